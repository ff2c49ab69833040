use servyy_agent::{assemble_runtime, AgentRuntime, ExternalServices, TurnOutcome};
use servyy_core::config::{AppConfig, LoadOptions};
use servyy_core::domain::conversation::UserId;
use servyy_db::{connect_with_settings, migrations};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::commands::{command_runtime, CommandResult};

const COMMAND: &str = "chat";
/// Turns shown when a session starts.
pub const RECENT_TURNS_SHOWN: usize = 5;
const RULE: &str = "============================================================";
const GUEST: &str = "guest";

const BANNER: &str = "\
🚀 **SALES AI MANAGER** - Your Sales Assistant
============================================================
💼 I can help you with:
   • Cold Email Writing & Sending
   • Sales Proposals
   • Negotiation Advice
   • Contract Generation
   • Prospect Management
============================================================
💡 Examples:
   'Send cold email to john@company.com about our web development services'
   'Create a proposal for ABC Corp for digital marketing'
   'Give me negotiation advice for a difficult client'
   'Generate contract template for software development project'
============================================================
🔒 Security: Professional use only - No spam/fraud/illegal content
Type 'quit' to exit
";

pub fn run(user_id: Option<String>) -> CommandResult {
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
    init_logging(&config);

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

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let services = ExternalServices::from_config(&config)
            .map_err(|error| ("assembly", error.to_string(), 6u8))?;
        let agent = assemble_runtime(&config, pool.clone(), services)
            .map_err(|error| ("assembly", error.to_string(), 6u8))?;

        let mut input = tokio::io::BufReader::new(tokio::io::stdin());
        let mut output = tokio::io::stdout();
        let session = run_session(&agent, user_id, &mut input, &mut output).await;
        pool.close().await;
        session.map_err(|error| ("terminal_io", error.to_string(), 7u8))
    });

    match result {
        Ok(_) => CommandResult { exit_code: 0, output: String::new() },
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    }
}

/// Logs go to stderr so they never interleave with the conversation.
fn init_logging(config: &AppConfig) {
    let level = config.logging.level.parse::<tracing::Level>().unwrap_or(tracing::Level::WARN);
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

/// Runs one terminal conversation until `quit`, `exit`, `bye` or end of
/// input. Returns the number of messages sent to the assistant.
pub async fn run_session<R, W>(
    agent: &AgentRuntime,
    user_id: Option<String>,
    input: &mut R,
    output: &mut W,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write(output, BANNER).await?;
    write(output, "\n").await?;

    let user_id = match user_id.as_deref().and_then(UserId::parse) {
        Some(user_id) => user_id,
        None => {
            write(output, "🔑 Enter your username (for chat history): ").await?;
            let entered = read_line(input).await?.unwrap_or_default();
            match UserId::parse(&entered) {
                Some(user_id) => user_id,
                None => {
                    write(output, "⚠️ Username cannot be empty. Using 'guest'.\n").await?;
                    UserId(GUEST.to_string())
                }
            }
        }
    };

    match agent.recent_history(&user_id, RECENT_TURNS_SHOWN).await {
        Ok(turns) if !turns.is_empty() => {
            write(output, "\n📜 Your recent conversation history:\n").await?;
            for turn in &turns {
                write(output, &format!("👤 You: {}\n🤖 AI: {}\n", turn.user_text, turn.assistant_text))
                    .await?;
            }
            write(output, &format!("{RULE}\n")).await?;
        }
        Ok(_) => {}
        Err(error) => {
            write(output, &format!("❌ Could not load your history: {error}\n")).await?;
        }
    }

    let mut sent = 0;
    loop {
        write(output, &format!("👤 {user_id}: ")).await?;
        let Some(line) = read_line(input).await? else {
            write(output, "\n👋 Thanks for using Sales AI Manager! Keep closing those deals!\n").await?;
            break;
        };
        let message = line.trim();

        if matches!(message.to_lowercase().as_str(), "quit" | "exit" | "bye") {
            write(output, "👋 Thanks for using Sales AI Manager! Keep closing those deals!\n").await?;
            break;
        }
        if message.is_empty() {
            write(output, "🤔 Please enter your sales request...\n").await?;
            continue;
        }

        write(output, "🤖 Sales AI: Thinking...\n").await?;
        sent += 1;
        let correlation_id = Uuid::new_v4().to_string();
        match agent.handle_message(&correlation_id, &user_id, message).await {
            Ok(TurnOutcome::Rejected) => {
                write(output, "🤔 Please enter your sales request...\n").await?;
            }
            Ok(TurnOutcome::Refused { reply }) | Ok(TurnOutcome::Completed { reply }) => {
                write(output, &format!("🤖 Sales AI: {reply}\n\n")).await?;
            }
            Err(error) => {
                write(
                    output,
                    &format!(
                        "❌ Sorry, I encountered an error: {error}\n\n🔄 Please try again with a different request.\n\n"
                    ),
                )
                .await?;
            }
        }
    }

    Ok(sent)
}

async fn read_line<R>(input: &mut R) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if input.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

async fn write<W>(output: &mut W, text: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    output.write_all(text.as_bytes()).await?;
    output.flush().await
}
