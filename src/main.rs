use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tower::Service;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use telerecours_scraper::{
    Credentials, ExtractionRequest, ExtractionService, Jurisdiction, RunMode, Selection,
    SelectionPrompt, TelerecoursConfig,
};

const DEFAULT_PROMPTED_MAX: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "telerecours")]
#[command(about = "Télérecours メッセージ抽出（通知の自動検出付き）")]
struct Cli {
    /// 通知のある全ジュリディクションを抽出
    #[arg(long)]
    auto: bool,

    /// ジュリディクションコード（例: TA78）
    #[arg(long, value_name = "CODE")]
    jurisdiction: Option<String>,

    /// ブラウザを表示する
    #[arg(long)]
    no_headless: bool,

    /// 未読ではなく既読メッセージを抽出（テスト用）
    #[arg(long)]
    read_messages: bool,

    /// ジュリディクションごとの最大メッセージ数（未指定なら入力を求める）
    #[arg(long, value_name = "N")]
    max_messages: Option<usize>,

    #[arg(long, env = "TELERECOURS_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "TELERECOURS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// JSON結果を受け取るwebhookのURL
    #[arg(long, value_name = "URL")]
    webhook: Option<String>,

    /// 確認を省略する
    #[arg(short, long)]
    yes: bool,

    #[arg(long, default_value = "./extractions")]
    output_dir: PathBuf,

    #[arg(long, default_value = "./pdfs")]
    downloads_dir: PathBuf,

    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn mode(&self) -> RunMode {
        if self.auto {
            RunMode::Auto
        } else if let Some(code) = &self.jurisdiction {
            RunMode::Jurisdiction(code.trim().to_uppercase())
        } else {
            RunMode::Interactive
        }
    }
}

fn ask(label: &str) -> String {
    print!("{}", label);
    let _ = io::stdout().flush();
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line).is_err() {
        return String::new();
    }
    line.trim().to_string()
}

/// 標準入力で確認・選択する
struct StdinPrompt {
    assume_yes: bool,
}

impl SelectionPrompt for StdinPrompt {
    fn confirm(&mut self, jurisdictions: &[Jurisdiction]) -> bool {
        if self.assume_yes {
            return true;
        }
        let answer = ask(&format!(
            "\nこの {}件のジュリディクションを抽出しますか？ (y/N): ",
            jurisdictions.len()
        ));
        answer.eq_ignore_ascii_case("y")
    }

    fn choose(&mut self, jurisdictions: &[Jurisdiction]) -> Selection {
        println!("選択肢:");
        println!("  1. 全ジュリディクションを抽出");
        println!("  2. ジュリディクションを1件選ぶ");
        println!("  0. 終了");

        match ask("\n選択: ").as_str() {
            "1" => Selection::All,
            "2" => {
                println!("\n選択可能なコード:");
                for j in jurisdictions {
                    println!("  - {} ({})", j.code, j.name);
                }
                Selection::One(ask("\nジュリディクションコード: ").to_uppercase())
            }
            _ => Selection::Quit,
        }
    }
}

/// 引数・環境変数 → 対話入力の順で取得。パスワードはエコーしない。
fn resolve_credentials(cli: &Cli) -> Credentials {
    let identifier = match cli.username.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(user) => {
            println!("識別子: {}", user);
            user.to_string()
        }
        None => ask("識別子: "),
    };
    let secret = match cli.password.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(pass) => {
            println!("パスワード: ***");
            pass.to_string()
        }
        None => rpassword::prompt_password("パスワード: ").unwrap_or_else(|e| {
            error!("パスワードを読み取れません: {}", e);
            String::new()
        }),
    };
    Credentials::new(identifier, secret)
}

fn resolve_max_messages(cli: &Cli) -> usize {
    if let Some(max) = cli.max_messages {
        return max;
    }
    ask(&format!(
        "ジュリディクションごとの最大メッセージ数 (既定 {}): ",
        DEFAULT_PROMPTED_MAX
    ))
    .parse()
    .unwrap_or(DEFAULT_PROMPTED_MAX)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    println!("{}", "=".repeat(70));
    println!("Télérecours 認証情報");
    println!("{}", "=".repeat(70));

    let credentials = resolve_credentials(&cli);
    if let Err(e) = credentials.validate() {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    let config = TelerecoursConfig::new()
        .with_headless(!cli.no_headless)
        .with_read_messages(cli.read_messages)
        .with_max_messages(resolve_max_messages(&cli))
        .with_output_dir(&cli.output_dir)
        .with_downloads_dir(&cli.downloads_dir)
        .with_webhook_url(cli.webhook.clone());

    let mode = cli.mode();
    info!(
        "モード {:?}, 最大 {}件, {}",
        mode,
        config.max_messages,
        if config.read_messages { "既読メッセージ" } else { "未読メッセージ" }
    );

    let request = ExtractionRequest::new(config, credentials, mode).with_prompt(StdinPrompt {
        assume_yes: cli.yes,
    });

    let mut service = ExtractionService::new();
    match service.call(request).await {
        Ok(summary) => {
            println!("\n{}", summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supplied_password_is_used_without_prompt() {
        let cli = Cli::try_parse_from([
            "telerecours",
            "--username",
            "avocat",
            "--password",
            "pw",
            "--jurisdiction",
            " ta78 ",
        ])
        .unwrap();

        let credentials = resolve_credentials(&cli);
        assert!(credentials.validate().is_ok());
        assert_eq!(credentials.identifier, "avocat");
        assert_eq!(credentials.secret, "pw");
        assert_eq!(cli.mode(), RunMode::Jurisdiction("TA78".into()));
    }
}
