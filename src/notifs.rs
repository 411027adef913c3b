//! ジュリディクション選択ページから未読通知を検出する

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::TelerecoursConfig;
use crate::error::ScraperError;
use crate::session::{PageScript, PageSession, WaitCondition};

static RE_POSTBACK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"__doPostBack\('([^']+)',\s*'([^']+)'\)").expect("invalid regex: postback")
});

static SEL_NAMED_ITEM: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("li[name]").expect("invalid selector: li[name]"));
static SEL_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a").expect("invalid selector: a"));
static SEL_COUNT: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("span.page-choixJuridiction-mail").expect("invalid selector: count span")
});
static SEL_SPAN: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span").expect("invalid selector: span"));

/// 未読メッセージのあるジュリディクション
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jurisdiction {
    pub code: String,
    pub name: String,
    pub pending: u32,
    pub event_target: String,
    pub event_argument: String,
}

/// 選択ページのHTMLを解析する。未読0件の行と、ポストバックを持たないリンクは除外。
pub fn parse_jurisdictions(html: &str) -> Vec<Jurisdiction> {
    let document = Html::parse_document(html);

    document
        .select(&SEL_NAMED_ITEM)
        .filter_map(|li| {
            let code = li.value().attr("name")?.trim().to_string();
            let link = li.select(&SEL_LINK).next()?;
            let href = link.value().attr("href").unwrap_or_default();
            let caps = RE_POSTBACK.captures(href)?;

            let (name, pending) = match link.select(&SEL_COUNT).next() {
                Some(count) => (text_before_span(link), parse_count(count)),
                None => (collapse(&link.text().collect::<String>()), 0),
            };

            Some(Jurisdiction {
                code,
                name,
                pending,
                event_target: caps[1].to_string(),
                event_argument: caps[2].to_string(),
            })
        })
        .filter(|j| j.pending > 0)
        .collect()
}

/// 最初の子 `<span>` より前のテキスト
fn text_before_span(link: ElementRef) -> String {
    let mut parts = Vec::new();
    for child in link.children() {
        if let Some(text) = child.value().as_text() {
            parts.push(text.trim().to_string());
        } else if child.value().as_element().map(|e| e.name()) == Some("span") {
            break;
        }
    }
    parts.concat().trim().to_string()
}

fn parse_count(count: ElementRef) -> u32 {
    count
        .select(&SEL_SPAN)
        .next()
        .and_then(|inner| inner.text().collect::<String>().trim().parse().ok())
        .unwrap_or(0)
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 表示用の要約（件数の多い順）。引数の並びは変更しない。
pub fn display(jurisdictions: &[Jurisdiction]) -> String {
    if jurisdictions.is_empty() {
        return "通知はありません".to_string();
    }

    let mut sorted: Vec<&Jurisdiction> = jurisdictions.iter().collect();
    sorted.sort_by(|a, b| b.pending.cmp(&a.pending));

    let rule = "=".repeat(70);
    let mut out = format!(
        "通知のあるジュリディクション: {}件\n{}\n",
        jurisdictions.len(),
        rule
    );
    for j in sorted {
        out.push_str(&format!(
            "   {} - {:<30} : {:>3}件\n",
            j.code, j.name, j.pending
        ));
    }
    let total: u32 = jurisdictions.iter().map(|j| j.pending).sum();
    out.push_str(&format!("{}\n   合計: 未読 {}件\n", rule, total));
    out
}

pub struct NotificationDetector<'a> {
    config: &'a TelerecoursConfig,
}

impl<'a> NotificationDetector<'a> {
    pub fn new(config: &'a TelerecoursConfig) -> Self {
        Self { config }
    }

    /// 通知のあるジュリディクション一覧（ソース順）。HTML未指定なら選択ページを取得する。
    pub async fn list<S>(&self, session: &mut S, html: Option<&str>) -> Vec<Jurisdiction>
    where
        S: PageSession + ?Sized,
    {
        let fetched;
        let html = match html {
            Some(html) => html,
            None => {
                info!("ジュリディクション選択ページを取得中...");
                match session
                    .open(&self.config.selection_url, self.config.page_timeout)
                    .await
                {
                    Ok(snapshot) => {
                        fetched = snapshot.html;
                        fetched.as_str()
                    }
                    Err(e) => {
                        warn!("選択ページを取得できません: {}", e);
                        return Vec::new();
                    }
                }
            }
        };

        let jurisdictions = parse_jurisdictions(html);
        debug!("通知のあるジュリディクション: {}件", jurisdictions.len());
        jurisdictions
    }

    /// ポストバックでジュリディクションを選択する。同じものを再選択してもよい。
    ///
    /// ポストバック前の `<body>` には印を付けるので、再描画された後の本文だけを待つ。
    pub async fn select<S>(
        &self,
        session: &mut S,
        jurisdiction: &Jurisdiction,
    ) -> Result<(), ScraperError>
    where
        S: PageSession + ?Sized,
    {
        info!("{} ({}) を選択中...", jurisdiction.code, jurisdiction.name);

        let postback = PageScript::PostBack {
            target: jurisdiction.event_target.clone(),
            argument: jurisdiction.event_argument.clone(),
        };
        session
            .run(
                &postback,
                &WaitCondition::fresh("body"),
                self.config.page_timeout,
            )
            .await
            .map_err(|e| {
                ScraperError::Navigation(format!("{} の選択: {}", jurisdiction.code, e))
            })?;

        info!("{} を選択しました", jurisdiction.code);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::ScriptedSession;

    const SELECTION_HTML: &str = r##"
<html><body><ul>
  <li name="TA75"><a href="javascript:__doPostBack('ctl00$lstJur','TA75')">Paris<span class="page-choixJuridiction-mail"><span>2</span></span></a></li>
  <li name="TA78"><a href="javascript:__doPostBack('ctl00$lstJur','TA78')">Versailles</a></li>
  <li name="TA93"><a href="javascript:__doPostBack('ctl00$lstJur','TA93')">Montreuil<span class="page-choixJuridiction-mail"><span>0</span></span></a></li>
  <li name="TA95"><a href="#">Cergy-Pontoise<span class="page-choixJuridiction-mail"><span>4</span></span></a></li>
  <li name="TA92"><a href="javascript:__doPostBack('ctl00$lstJur', 'TA92')">
      Cergy <span class="page-choixJuridiction-mail"><span> 7 </span></span></a></li>
  <li><a href="javascript:__doPostBack('ctl00$lstJur','XX')">Sans code<span class="page-choixJuridiction-mail"><span>3</span></span></a></li>
</ul></body></html>"##;

    #[test]
    fn test_parse_keeps_nonzero_in_source_order() {
        let jurisdictions = parse_jurisdictions(SELECTION_HTML);
        let codes: Vec<&str> = jurisdictions.iter().map(|j| j.code.as_str()).collect();
        assert_eq!(codes, vec!["TA75", "TA92"]);

        assert_eq!(jurisdictions[0].name, "Paris");
        assert_eq!(jurisdictions[0].pending, 2);
        assert_eq!(jurisdictions[0].event_target, "ctl00$lstJur");
        assert_eq!(jurisdictions[0].event_argument, "TA75");

        assert_eq!(jurisdictions[1].name, "Cergy");
        assert_eq!(jurisdictions[1].pending, 7);
    }

    #[test]
    fn test_zero_and_nonzero_items() {
        let html = r#"<ul>
<li name="TA01"><a href="javascript:__doPostBack('t','a1')">Zero<span class="page-choixJuridiction-mail"><span>0</span></span></a></li>
<li name="TA02"><a href="javascript:__doPostBack('t','a2')">Un<span class="page-choixJuridiction-mail"><span>1</span></span></a></li>
</ul>"#;
        let jurisdictions = parse_jurisdictions(html);
        assert_eq!(jurisdictions.len(), 1);
        assert_eq!(jurisdictions[0].code, "TA02");
    }

    #[test]
    fn test_unparsable_markup_yields_nothing() {
        assert!(parse_jurisdictions("").is_empty());
        assert!(parse_jurisdictions("<p>maintenance</p>").is_empty());
    }

    #[test]
    fn test_display_sorts_without_reordering_input() {
        let jurisdictions = vec![
            Jurisdiction {
                code: "TA75".into(),
                name: "Paris".into(),
                pending: 1,
                event_target: "t".into(),
                event_argument: "a".into(),
            },
            Jurisdiction {
                code: "TA78".into(),
                name: "Versailles".into(),
                pending: 5,
                event_target: "t".into(),
                event_argument: "b".into(),
            },
        ];
        let text = display(&jurisdictions);

        let pos_78 = text.find("TA78").unwrap();
        let pos_75 = text.find("TA75").unwrap();
        assert!(pos_78 < pos_75);
        assert!(text.contains("合計: 未読 6件"));
        assert_eq!(jurisdictions[0].code, "TA75");
        assert_eq!(display(&[]), "通知はありません");
    }

    #[tokio::test]
    async fn test_list_fetches_selection_page() {
        let tmp = tempfile::tempdir().unwrap();
        let config = TelerecoursConfig::new();
        let mut session = ScriptedSession::new(tmp.path(), |_, _| Ok(String::new()))
            .with_open_html(Ok(SELECTION_HTML));

        let jurisdictions = NotificationDetector::new(&config).list(&mut session, None).await;
        assert_eq!(jurisdictions.len(), 2);
        assert_eq!(session.opened, vec![config.selection_url.clone()]);
    }

    #[tokio::test]
    async fn test_list_uses_supplied_markup() {
        let tmp = tempfile::tempdir().unwrap();
        let config = TelerecoursConfig::new();
        let mut session = ScriptedSession::new(tmp.path(), |_, _| Ok(String::new()));

        let jurisdictions = NotificationDetector::new(&config)
            .list(&mut session, Some(SELECTION_HTML))
            .await;
        assert_eq!(jurisdictions.len(), 2);
        assert!(session.opened.is_empty());
    }

    #[tokio::test]
    async fn test_list_navigation_failure_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let config = TelerecoursConfig::new();
        let mut session = ScriptedSession::new(tmp.path(), |_, _| Ok(String::new()))
            .with_open_html(Err("timeout"));

        let jurisdictions = NotificationDetector::new(&config).list(&mut session, None).await;
        assert!(jurisdictions.is_empty());
    }

    #[tokio::test]
    async fn test_select_is_repeatable() {
        let tmp = tempfile::tempdir().unwrap();
        let config = TelerecoursConfig::new();
        let mut session = ScriptedSession::new(tmp.path(), |_, _| Ok("<body></body>".into()));
        let jurisdiction = parse_jurisdictions(SELECTION_HTML).remove(0);
        let detector = NotificationDetector::new(&config);

        detector.select(&mut session, &jurisdiction).await.unwrap();
        detector.select(&mut session, &jurisdiction).await.unwrap();

        let expected = PageScript::PostBack {
            target: "ctl00$lstJur".into(),
            argument: "TA75".into(),
        };
        assert_eq!(session.scripts, vec![expected.clone(), expected]);
    }

    #[tokio::test]
    async fn test_select_waits_for_rerendered_body() {
        let tmp = tempfile::tempdir().unwrap();
        let config = TelerecoursConfig::new();
        let mut session = ScriptedSession::new(tmp.path(), |_, _| Ok("<body></body>".into()));
        let jurisdiction = parse_jurisdictions(SELECTION_HTML).remove(0);

        NotificationDetector::new(&config)
            .select(&mut session, &jurisdiction)
            .await
            .unwrap();

        assert_eq!(session.waits, vec![WaitCondition::fresh("body")]);
    }

    #[tokio::test]
    async fn test_select_failure_carries_cause() {
        let tmp = tempfile::tempdir().unwrap();
        let config = TelerecoursConfig::new();
        let mut session = ScriptedSession::new(tmp.path(), |_, _| {
            Err(ScraperError::Timeout("body".into()))
        });
        let jurisdiction = parse_jurisdictions(SELECTION_HTML).remove(0);

        let err = NotificationDetector::new(&config)
            .select(&mut session, &jurisdiction)
            .await
            .unwrap_err();
        assert!(matches!(err, ScraperError::Navigation(_)));
        assert!(err.to_string().contains("TA75"));
    }
}
