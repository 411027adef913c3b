//! メッセージ一覧・詳細ページの解析

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::types::{AttachmentKind, MessageRecord, ReadStatus};
use crate::classify;

static RE_READ_MESSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"lireMessage\('([^']+)',\s*'([^']+)'\)").expect("invalid regex: lireMessage")
});

static SEL_UNREAD_ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr.messageNonLu").expect("invalid selector: unread row"));
static SEL_STANDARD_ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr.tableListeTrR2").expect("invalid selector: standard row"));
static SEL_CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td").expect("invalid selector: td"));
static SEL_LABEL_CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td, th").expect("invalid selector: td, th"));
static SEL_SUBJECT_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.numMessage").expect("invalid selector: a.numMessage"));
static SEL_ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr").expect("invalid selector: tr"));
static SEL_HREF_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("invalid selector: a[href]"));
static SEL_GENERATED_FILE: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a.hplGenFichier").expect("invalid selector: a.hplGenFichier")
});

pub(crate) const UNREAD_CLASS: &str = "messageNonLu";
/// 主添付を含む行のラベル
pub(crate) const SENT_LETTER_CAPTION: &str = "Courrier envoyé";

fn text(el: ElementRef) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn has_class(el: ElementRef, class: &str) -> bool {
    el.value().classes().any(|c| c == class)
}

/// 一覧から対象行を選び、先頭 `max_messages` 行を解析する。
///
/// 未読モードは `messageNonLu` 行、既読（テスト）モードは `tableListeTrR2` 行のうち
/// `messageNonLu` でないものを対象にする。2つのモードで行の分類規則が一致しないのは
/// ポータル側の既存挙動に合わせたもの（`tableListeTrR1` の既読行は拾われない）。
/// 不正な行は黙って捨てるので、`index` は欠番になりうる。
pub fn parse_message_list(
    html: &str,
    unread_only: bool,
    max_messages: usize,
) -> Vec<MessageRecord> {
    let document = Html::parse_document(html);

    let rows: Vec<ElementRef> = if unread_only {
        document.select(&SEL_UNREAD_ROW).collect()
    } else {
        document
            .select(&SEL_STANDARD_ROW)
            .filter(|tr| !has_class(*tr, UNREAD_CLASS))
            .collect()
    };

    rows.into_iter()
        .take(max_messages)
        .enumerate()
        .filter_map(|(i, tr)| parse_row(tr, i + 1))
        .collect()
}

/// セル構成: [アイコン, 差出人, 事件, 件名リンク, 報告者, 日付]
fn parse_row(tr: ElementRef, index: usize) -> Option<MessageRecord> {
    let cells: Vec<ElementRef> = tr.select(&SEL_CELL).collect();
    if cells.len() < 6 {
        return None;
    }

    let link = cells[3].select(&SEL_SUBJECT_LINK).next()?;
    let onclick = link.value().attr("onclick").unwrap_or_default();
    let caps = RE_READ_MESSAGE.captures(onclick)?;

    let subject = text(link);
    let status = if has_class(tr, UNREAD_CLASS) {
        ReadStatus::Unread
    } else {
        ReadStatus::Read
    };

    Some(MessageRecord {
        index,
        message_id: caps[1].to_string(),
        message_type: caps[2].to_string(),
        status,
        sender: text(cells[1]),
        case_reference: text(cells[2]),
        category: classify::normalize(&subject),
        subject,
        rapporteur: text(cells[4]),
        date: text(cells[5]),
        attachments: Vec::new(),
        has_supplementary_attachments: false,
    })
}

/// 詳細ページで検出した添付リンク
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentLink {
    pub kind: AttachmentKind,
    /// hrefから取ったファイル名、またはリンク文字列から作った推奨名
    pub filename: String,
    pub trigger: AttachmentTrigger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentTrigger {
    Href(String),
    /// クリック対象の要素ID
    Click(String),
}

fn is_pdf_href(href: &str) -> bool {
    href.to_lowercase().contains(".pdf")
}

fn filename_from_href(href: &str) -> String {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// 添付リンクを優先順（主添付 → 直接リンク → クリック型）で抽出する
pub fn extract_attachment_links(html: &str) -> Vec<AttachmentLink> {
    let document = Html::parse_document(html);
    let mut links = Vec::new();

    let primary = document
        .select(&SEL_ROW)
        .filter(|tr| {
            tr.select(&SEL_LABEL_CELL)
                .next()
                .map(|label| text(label) == SENT_LETTER_CAPTION)
                .unwrap_or(false)
        })
        .find_map(|tr| {
            tr.select(&SEL_HREF_LINK)
                .filter_map(|a| a.value().attr("href"))
                .find(|href| is_pdf_href(href))
        })
        .map(|href| AttachmentLink {
            kind: AttachmentKind::PrimarySentLetter,
            filename: filename_from_href(href),
            trigger: AttachmentTrigger::Href(href.to_string()),
        });

    let claimed = primary.as_ref().map(|p| p.filename.clone());
    links.extend(primary);

    for href in document
        .select(&SEL_HREF_LINK)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| is_pdf_href(href))
    {
        let filename = filename_from_href(href);
        if claimed.as_deref() == Some(filename.as_str()) {
            continue;
        }
        links.push(AttachmentLink {
            kind: AttachmentKind::DirectLink,
            filename,
            trigger: AttachmentTrigger::Href(href.to_string()),
        });
    }

    for a in document.select(&SEL_GENERATED_FILE) {
        let label = text(a);
        let lowered = label.to_lowercase();
        if !lowered.contains("accusé") && !lowered.contains("pdf") {
            continue;
        }
        let Some(id) = a.value().attr("id").filter(|id| !id.is_empty()) else {
            continue;
        };
        links.push(AttachmentLink {
            kind: AttachmentKind::OnclickTriggered,
            filename: format!("{}.pdf", label.replace(' ', "_")),
            trigger: AttachmentTrigger::Click(id.to_string()),
        });
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Category;

    fn row(class: &str, id: &str, subject: &str) -> String {
        format!(
            r##"<tr class="{class}">
  <td><img src="mail.png"/></td>
  <td>Greffe TA Paris</td>
  <td>2501568 - Monsieur DIARRA Bouh / PRÉFET DE POLICE</td>
  <td><a class="numMessage" href="#" onclick="lireMessage('{id}', 'N')">{subject}</a></td>
  <td>M. Dupont</td>
  <td>10/11/2025 13:21</td>
</tr>"##
        )
    }

    fn list(rows: &[String]) -> String {
        format!("<html><body><table>{}</table></body></html>", rows.concat())
    }

    #[test]
    fn test_unread_rows_truncated_in_order() {
        let html = list(&[
            row("tableListeTrR1 messageNonLu", "m1", "Accusé de réception de la requête"),
            row("tableListeTrR2 messageNonLu", "m2", "Avis d'audience"),
            row("tableListeTrR1 messageNonLu", "m3", "Décision"),
        ]);

        let records = parse_message_list(&html, true, 2);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message_id, "m1");
        assert_eq!(records[0].index, 1);
        assert_eq!(records[1].message_id, "m2");
        assert_eq!(records[1].index, 2);
    }

    #[test]
    fn test_row_fields() {
        let html = list(&[row("messageNonLu", "4242", "Accusé de réception de la requête")]);
        let record = &parse_message_list(&html, true, 10)[0];

        assert_eq!(record.message_type, "N");
        assert_eq!(record.status, ReadStatus::Unread);
        assert_eq!(record.sender, "Greffe TA Paris");
        assert_eq!(
            record.case_reference,
            "2501568 - Monsieur DIARRA Bouh / PRÉFET DE POLICE"
        );
        assert_eq!(record.subject, "Accusé de réception de la requête");
        assert_eq!(record.category, Category::Acknowledgement);
        assert_eq!(record.rapporteur, "M. Dupont");
        assert_eq!(record.date, "10/11/2025 13:21");
        assert!(record.attachments.is_empty());
    }

    // 既読モードは tableListeTrR2 しか見ないため、tableListeTrR1 の既読行は対象外になる
    #[test]
    fn test_read_mode_only_sees_standard_rows() {
        let html = list(&[
            row("tableListeTrR1", "r1", "Décision"),
            row("tableListeTrR2", "r2", "Décision"),
            row("tableListeTrR2 messageNonLu", "u1", "Décision"),
            row("tableListeTrR2", "r3", "Jugement"),
        ]);

        let records = parse_message_list(&html, false, 10);
        let ids: Vec<&str> = records.iter().map(|r| r.message_id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r3"]);
        assert!(records.iter().all(|r| r.status == ReadStatus::Read));
    }

    #[test]
    fn test_malformed_rows_are_dropped_silently() {
        let short = r#"<tr class="messageNonLu"><td>a</td><td>b</td></tr>"#.to_string();
        let no_pattern = row("messageNonLu", "x", "Décision").replace("lireMessage", "voirMessage");
        let html = list(&[short, no_pattern, row("messageNonLu", "ok", "Décision")]);

        let records = parse_message_list(&html, true, 10);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message_id, "ok");
        assert_eq!(records[0].index, 3);
    }

    #[test]
    fn test_empty_list() {
        assert!(parse_message_list("<html></html>", true, 10).is_empty());
        let html = list(&[row("messageNonLu", "m1", "Décision")]);
        assert!(parse_message_list(&html, true, 0).is_empty());
    }

    const DETAIL_HTML: &str = r#"
<div id="divEnteteMsg">Message</div>
<table>
  <tr><td>Objet</td><td>Accusé de réception</td></tr>
  <tr><td>Courrier envoyé</td><td>
      <a href="/Documents/notice.txt">notice</a>
      <a href="/Documents/AR_2501568.pdf">AR_2501568.pdf</a>
      <a href="/Documents/second.pdf">second</a>
  </td></tr>
  <tr><td>Pièces jointes</td><td>
      <a href="/Documents/piece1.PDF?v=2">piece1</a>
      <a href="https://cdn.example.org/docs/piece2.pdf">piece2</a>
  </td></tr>
</table>
<a id="hplAR" class="hplGenFichier">Accusé de réception</a>
<a id="hplOther" class="hplGenFichier">Imprimer</a>
<a class="hplGenFichier">Télécharger PDF</a>
"#;

    #[test]
    fn test_attachment_classes() {
        let links = extract_attachment_links(DETAIL_HTML);

        let primary: Vec<_> = links
            .iter()
            .filter(|l| l.kind == AttachmentKind::PrimarySentLetter)
            .collect();
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].filename, "AR_2501568.pdf");
        assert_eq!(
            primary[0].trigger,
            AttachmentTrigger::Href("/Documents/AR_2501568.pdf".into())
        );

        let direct: Vec<&str> = links
            .iter()
            .filter(|l| l.kind == AttachmentKind::DirectLink)
            .map(|l| l.filename.as_str())
            .collect();
        assert_eq!(direct, vec!["second.pdf", "piece1.PDF", "piece2.pdf"]);
        assert!(!direct.contains(&"AR_2501568.pdf"));

        let onclick: Vec<_> = links
            .iter()
            .filter(|l| l.kind == AttachmentKind::OnclickTriggered)
            .collect();
        assert_eq!(onclick.len(), 1);
        assert_eq!(onclick[0].filename, "Accusé_de_réception.pdf");
        assert_eq!(onclick[0].trigger, AttachmentTrigger::Click("hplAR".into()));
    }

    #[test]
    fn test_one_primary_two_direct() {
        let html = r#"<table>
<tr><th>Courrier envoyé</th><td><a href="/d/lettre.pdf">lettre</a></td></tr>
</table>
<p><a href="/d/annexe1.pdf">1</a><a href="/d/annexe2.pdf">2</a></p>"#;
        let links = extract_attachment_links(html);

        assert_eq!(links.len(), 3);
        assert_eq!(links[0].kind, AttachmentKind::PrimarySentLetter);
        assert_eq!(links[1].kind, AttachmentKind::DirectLink);
        assert_eq!(links[2].kind, AttachmentKind::DirectLink);
        assert_ne!(links[0].filename, links[1].filename);
        assert_ne!(links[0].filename, links[2].filename);
    }

    #[test]
    fn test_no_sent_letter_row_means_no_primary() {
        let html = r#"<a href="/d/a.pdf">a</a>"#;
        let links = extract_attachment_links(html);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].kind, AttachmentKind::DirectLink);
        assert!(extract_attachment_links("").is_empty());
    }

    #[test]
    fn test_filename_from_href() {
        assert_eq!(filename_from_href("/a/b/c.pdf"), "c.pdf");
        assert_eq!(filename_from_href("c.pdf?x=1"), "c.pdf");
        assert_eq!(filename_from_href("https://h/x/y.pdf#p2"), "y.pdf");
    }
}
