use std::time::Duration;

use reqwest::Url;
use servyy_agent::email::gmail::{OAuthClient, GMAIL_SEND_SCOPE};
use servyy_core::config::{AppConfig, LoadOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use crate::commands::{command_runtime, CommandResult};

const COMMAND: &str = "gmail-authorize";
const CALLBACK_WAIT: Duration = Duration::from_secs(300);

type Failure = (&'static str, String, u8);

pub fn run(port: u16) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match command_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    match runtime.block_on(authorize(&config, port)) {
        Ok(message) => CommandResult::success(COMMAND, message),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    }
}

async fn authorize(config: &AppConfig, port: u16) -> Result<String, Failure> {
    let client = OAuthClient::load(&config.gmail.credentials_path)
        .await
        .map_err(|error| ("credentials", error.to_string(), 4))?;

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|error| ("loopback_bind", error.to_string(), 5))?;
    let bound_port = listener
        .local_addr()
        .map_err(|error| ("loopback_bind", error.to_string(), 5))?
        .port();
    let redirect_uri = format!("http://127.0.0.1:{bound_port}/");

    let consent_url = client
        .consent_url(&redirect_uri)
        .map_err(|error| ("credentials", error.to_string(), 4))?;
    eprintln!("Open this URL in a browser to allow sending as your Gmail account ({GMAIL_SEND_SCOPE}):");
    eprintln!("\n  {consent_url}\n");
    eprintln!("Waiting for the redirect on {redirect_uri} ...");

    let code = tokio::time::timeout(CALLBACK_WAIT, receive_code(&listener))
        .await
        .map_err(|_| ("callback_timeout", "no authorization redirect received".to_string(), 6))??;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.gmail.timeout_secs))
        .build()
        .map_err(|error| ("token_exchange", error.to_string(), 7))?;
    let token = client
        .exchange_authorization_code(&http, &code, &redirect_uri)
        .await
        .map_err(|error| ("token_exchange", error.to_string(), 7))?;
    token
        .store(&config.gmail.token_path)
        .await
        .map_err(|error| ("token_store", error.to_string(), 8))?;

    Ok(format!("gmail token written to `{}`", config.gmail.token_path.display()))
}

/// Accepts one redirect, answers the browser and returns the `code` parameter.
async fn receive_code(listener: &TcpListener) -> Result<String, Failure> {
    let (stream, _) =
        listener.accept().await.map_err(|error| ("callback", error.to_string(), 6))?;
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader
        .read_line(&mut request_line)
        .await
        .map_err(|error| ("callback", error.to_string(), 6))?;

    let outcome = authorization_code(&request_line);
    let body = match &outcome {
        Ok(_) => "Authorization complete. You can close this tab.",
        Err(_) => "Authorization failed. Check the terminal for details.",
    };
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: text/plain; charset=utf-8\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    let mut stream = reader.into_inner();
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|error| ("callback", error.to_string(), 6))?;
    let _ = stream.shutdown().await;

    outcome
}

/// Extracts `code` from a request line such as `GET /?code=abc HTTP/1.1`.
fn authorization_code(request_line: &str) -> Result<String, Failure> {
    let target = request_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| ("callback", "malformed redirect request".to_string(), 6))?;
    let url = Url::parse(&format!("http://127.0.0.1{target}"))
        .map_err(|error| ("callback", error.to_string(), 6))?;

    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => {
                return Err(("consent_denied", format!("authorization was denied: {value}"), 6));
            }
            _ => {}
        }
    }
    code.filter(|code| !code.is_empty())
        .ok_or_else(|| ("callback", "redirect did not carry an authorization code".to_string(), 6))
}
