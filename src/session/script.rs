//! ページに注入するスクリプトのテンプレート
//!
//! 値はすべてJSON文字列リテラルとして埋め込むため、引用符を含む
//! パスワードなどでもスクリプトが壊れない。

/// 注入スクリプト
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageScript {
    /// ログインフォームに値を入力（送信はしない）
    FillLogin { identifier: String, secret: String },
    /// 要素をクリック
    Click { selector: String },
    /// `__doPostBack(target, argument)` を実行
    PostBack { target: String, argument: String },
    /// ページ側の関数があれば呼び出し、なければ代替要素をクリック
    CallOrClick {
        function: String,
        args: Vec<String>,
        fallback_selector: Option<String>,
    },
    /// リソースをblobとして取得し、ファイル名を指定して保存させる
    FetchAndSave { url: String, filename: String },
}

pub(crate) const USERNAME_FIELD: &str = "#Username";
pub(crate) const PASSWORD_FIELD: &str = "#password-field";

impl PageScript {
    pub fn click(selector: impl Into<String>) -> Self {
        PageScript::Click {
            selector: selector.into(),
        }
    }

    /// 対象要素の説明（エラーメッセージ用）
    pub fn target(&self) -> String {
        match self {
            PageScript::FillLogin { .. } => format!("{}, {}", USERNAME_FIELD, PASSWORD_FIELD),
            PageScript::Click { selector } => selector.clone(),
            PageScript::PostBack { target, .. } => format!("__doPostBack({})", target),
            PageScript::CallOrClick {
                function,
                fallback_selector,
                ..
            } => match fallback_selector {
                Some(sel) => format!("{}() / {}", function, sel),
                None => format!("{}()", function),
            },
            PageScript::FetchAndSave { url, .. } => url.clone(),
        }
    }

    /// 実行するJavaScript。評価結果は対象が見つかったかどうかの真偽値。
    ///
    /// ページ遷移を伴う操作は `setTimeout` で遅延させ、評価自体は遷移前に返す。
    pub fn render(&self) -> String {
        match self {
            PageScript::FillLogin { identifier, secret } => format!(
                r#"(() => {{
    const user = document.querySelector({user_sel});
    const pass = document.querySelector({pass_sel});
    if (!user || !pass) return false;
    user.value = {user};
    pass.value = {pass};
    return true;
}})()"#,
                user_sel = js_str(USERNAME_FIELD),
                pass_sel = js_str(PASSWORD_FIELD),
                user = js_str(identifier),
                pass = js_str(secret),
            ),
            PageScript::Click { selector } => format!(
                r#"(() => {{
    const el = document.querySelector({sel});
    if (!el) return false;
    setTimeout(() => el.click(), 0);
    return true;
}})()"#,
                sel = js_str(selector),
            ),
            PageScript::PostBack { target, argument } => format!(
                r#"(() => {{
    if (typeof __doPostBack !== 'function') return false;
    setTimeout(() => __doPostBack({target}, {argument}), 0);
    return true;
}})()"#,
                target = js_str(target),
                argument = js_str(argument),
            ),
            PageScript::CallOrClick {
                function,
                args,
                fallback_selector,
            } => {
                let args = args.iter().map(|a| js_str(a)).collect::<Vec<_>>().join(", ");
                let fallback = match fallback_selector {
                    Some(sel) => format!(
                        r#"const el = document.querySelector({sel});
    if (!el) return false;
    setTimeout(() => el.click(), 0);
    return true;"#,
                        sel = js_str(sel),
                    ),
                    None => "return false;".to_string(),
                };
                format!(
                    r#"(() => {{
    if (typeof window[{name}] === 'function') {{
        setTimeout(() => window[{name}]({args}), 0);
        return true;
    }}
    {fallback}
}})()"#,
                    name = js_str(function),
                    args = args,
                    fallback = fallback,
                )
            }
            PageScript::FetchAndSave { url, filename } => format!(
                r#"(async () => {{
    const response = await fetch({url}, {{ credentials: 'include' }});
    if (!response.ok) return false;
    const blob = await response.blob();
    const href = window.URL.createObjectURL(blob);
    const a = document.createElement('a');
    a.style.display = 'none';
    a.href = href;
    a.download = {filename};
    document.body.appendChild(a);
    a.click();
    await new Promise(resolve => setTimeout(resolve, 1000));
    window.URL.revokeObjectURL(href);
    document.body.removeChild(a);
    return true;
}})()"#,
                url = js_str(url),
                filename = js_str(filename),
            ),
        }
    }
}

/// JavaScript文字列リテラル
pub(crate) fn js_str(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}
