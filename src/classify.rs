//! メッセージ件名の分類と添付ファイル名の命名規則
//!
//! 件名（小文字化・空白正規化済み）を固定の語彙と完全一致で照合し、
//! 最初に一致したカテゴリを返す。どれにも一致しなければ `Unknown`。

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 件名カテゴリ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Accusé de réception (AR)")]
    Acknowledgement,
    #[serde(rename = "Avis d'audience")]
    HearingNotice,
    #[serde(rename = "Mémoire en défense")]
    DefenseBrief,
    #[serde(rename = "Ordonnance de clôture d'instruction")]
    InstructionClosureOrder,
    #[serde(rename = "Ordonnance (autre)")]
    OtherOrder,
    #[serde(rename = "Décision")]
    Decision,
    #[serde(rename = "Encombrement du rôle")]
    DocketCongestion,
    #[serde(rename = "Demande de régularisation")]
    RegularizationRequest,
    #[serde(rename = "Moyen d'ordre public")]
    PublicPolicyGround,
    #[serde(rename = "Dossier prioritaire DALO")]
    HousingPriorityFile,
    #[serde(rename = "Objet inconnu")]
    Unknown,
}

/// 照合順。語彙同士は重複してはならない。
const RULES: &[(Category, &[&str])] = &[
    (
        Category::Acknowledgement,
        &[
            "accusé de réception de la requête",
            "accusé de réception",
            "accusé de réception d'un mémoire",
            "accusé de réception de pièces",
            "accusé de réception du mémoire complémentaire",
            "accusé de réception de la requête en référé",
        ],
    ),
    (
        Category::HearingNotice,
        &[
            "avis d'audience",
            "avis d'audience (rappel)",
            "convocation à l'audience",
            "avis de renvoi d'audience",
            "avis d'audience de référé",
        ],
    ),
    (
        Category::DefenseBrief,
        &[
            "mémoire en défense",
            "communication d'un mémoire en défense",
            "communication du mémoire en défense",
            "mémoire en défense de l'administration",
        ],
    ),
    (
        Category::InstructionClosureOrder,
        &[
            "ordonnance de clôture d'instruction",
            "ordonnance portant clôture d'instruction",
            "clôture d'instruction",
            "avis de clôture d'instruction",
        ],
    ),
    (
        Category::OtherOrder,
        &[
            "ordonnance",
            "notification d'ordonnance",
            "notification d'une ordonnance",
            "ordonnance de désistement",
            "ordonnance de non-lieu",
            "ordonnance de rejet",
            "ordonnance de réouverture d'instruction",
        ],
    ),
    (
        Category::Decision,
        &[
            "décision",
            "jugement",
            "notification de décision",
            "notification de jugement",
            "notification d'un jugement",
            "notification de la décision",
        ],
    ),
    (
        Category::DocketCongestion,
        &[
            "encombrement du rôle",
            "information sur l'encombrement du rôle",
            "lettre d'encombrement",
        ],
    ),
    (
        Category::RegularizationRequest,
        &[
            "demande de régularisation",
            "demande de régularisation de la requête",
            "invitation à régulariser",
            "demande de pièces complémentaires",
        ],
    ),
    (
        Category::PublicPolicyGround,
        &[
            "moyen d'ordre public",
            "communication d'un moyen d'ordre public",
            "moyen relevé d'office",
            "information préalable - moyen relevé d'office",
        ],
    ),
    (
        Category::HousingPriorityFile,
        &[
            "dossier prioritaire dalo",
            "dalo - dossier prioritaire",
            "recours dalo",
            "droit au logement opposable",
        ],
    ),
];

impl Category {
    pub const ALL: [Category; 11] = [
        Category::Acknowledgement,
        Category::HearingNotice,
        Category::DefenseBrief,
        Category::InstructionClosureOrder,
        Category::OtherOrder,
        Category::Decision,
        Category::DocketCongestion,
        Category::RegularizationRequest,
        Category::PublicPolicyGround,
        Category::HousingPriorityFile,
        Category::Unknown,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Category::Acknowledgement => "Accusé de réception (AR)",
            Category::HearingNotice => "Avis d'audience",
            Category::DefenseBrief => "Mémoire en défense",
            Category::InstructionClosureOrder => "Ordonnance de clôture d'instruction",
            Category::OtherOrder => "Ordonnance (autre)",
            Category::Decision => "Décision",
            Category::DocketCongestion => "Encombrement du rôle",
            Category::RegularizationRequest => "Demande de régularisation",
            Category::PublicPolicyGround => "Moyen d'ordre public",
            Category::HousingPriorityFile => "Dossier prioritaire DALO",
            Category::Unknown => "Objet inconnu",
        }
    }

    /// このカテゴリに一致する件名の語彙
    pub fn subjects(&self) -> &'static [&'static str] {
        RULES
            .iter()
            .find(|(category, _)| category == self)
            .map(|(_, subjects)| *subjects)
            .unwrap_or(&[])
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 件名をカテゴリに変換（全域・純粋関数）
pub fn normalize(raw_subject: &str) -> Category {
    let subject = raw_subject
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    RULES
        .iter()
        .find(|(_, subjects)| subjects.contains(&subject.as_str()))
        .map(|(category, _)| *category)
        .unwrap_or(Category::Unknown)
}

pub const UNKNOWN_CLIENT: &str = "client-inconnu";
pub const UNKNOWN_MONTH_YEAR: &str = "00-0000";

const HONORIFICS: &[&str] = &[
    "monsieur",
    "madame",
    "mademoiselle",
    "maître",
    "m.",
    "mme",
    "mme.",
    "mlle",
    "mlle.",
    "me",
];

/// 事件欄 `"<番号> - <依頼人> / <相手方>"` から依頼人トークンを取り出す
pub fn client_token(case_reference: &str) -> String {
    let client = case_reference
        .split_once(" - ")
        .and_then(|(_, rest)| rest.split_once(" / "))
        .map(|(client, _)| client);

    let Some(client) = client else {
        return UNKNOWN_CLIENT.to_string();
    };

    let words: Vec<&str> = client
        .split_whitespace()
        .skip_while(|word| HONORIFICS.contains(&word.to_lowercase().as_str()))
        .collect();

    if words.is_empty() {
        UNKNOWN_CLIENT.to_string()
    } else {
        words.join("-")
    }
}

/// 日付欄 `"dd/mm/yyyy hh:mm"` から `mm-yyyy` を作る
pub fn month_year_token(date_text: &str) -> String {
    date_text
        .split_whitespace()
        .next()
        .and_then(|day| NaiveDate::parse_from_str(day, "%d/%m/%Y").ok())
        .map(|date| date.format("%m-%Y").to_string())
        .unwrap_or_else(|| UNKNOWN_MONTH_YEAR.to_string())
}

/// パス区切りとNULを `-` に置き換える
fn file_safe(token: &str) -> String {
    token
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '-',
            c => c,
        })
        .collect()
}

/// 主添付（送付書面）の正規ファイル名。常に単一のパス要素になる。
pub fn name_attachment(
    category: Category,
    case_reference: &str,
    date_text: &str,
    original_filename: &str,
) -> String {
    let client = file_safe(&client_token(case_reference));

    match category {
        Category::Acknowledgement => {
            format!("AR_{}_{}.pdf", client, month_year_token(date_text))
        }
        _ => {
            let stem = original_filename
                .rsplit_once('.')
                .map(|(stem, _)| stem)
                .unwrap_or(original_filename)
                .trim();
            let stem = if stem.is_empty() { category.label() } else { stem };
            format!("{}_{}.pdf", file_safe(stem), client)
        }
    }
}
