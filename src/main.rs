use courier::*;
use config::{Config, ConfigBuilder};
use email::Message;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracing_appender::non_blocking::WorkerGuard;

#[tokio::main]
async fn main() {

    let _logging_guard = setup_tracing();

    let args = Args::build();

    info!("courier {} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_COMMIT_HASH"));

    if let Command::GenerateConfig { output } = &args.command {
        if let Err(e) = Config::generate(output) {
            eprintln!("Error generating configuration: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let builder = ConfigBuilder::from_file(&args.config).map(|builder| match &args.templates {
        Some(dir) => builder.with_templates_dir(dir),
        None => builder,
    });

    let config = match builder {
        Ok(builder) => match builder.build() {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error building configuration: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    let state = AppState::new(config)
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize state: {}", e);
            std::process::exit(1);
        });

    let result = match args.command {
        Command::Send { to, subject, template, data, from, attachments } => {
            send(&state, to, subject, template, data, from, attachments).await
        }
        Command::Preview { template, data } => {
            preview(&state, template, data).await
        }
        Command::GenerateConfig { .. } => Ok(()),
    };

    state.mailer.shutdown();
    state.mailer.stopped().await;

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

async fn send(
    state: &AppState,
    to: String,
    subject: String,
    template: String,
    data: Option<String>,
    from: String,
    attachments: Vec<std::path::PathBuf>,
) -> Result<(), anyhow::Error> {
    let recipient = to.clone();
    let mut message = Message::new(to, subject)
        .with_template(template)
        .with_data(parse_data(data.as_deref())?)
        .with_from(from, "");
    message.attachments = attachments;

    let attempt = state.mailer.enqueue(message)?;
    info!(%attempt, "Email queued, waiting for delivery");

    state.mailer.drain().await;
    state.mailer.shutdown();
    state.mailer.stopped().await;

    match state.failures.failed() {
        0 => Ok(()),
        _ => Err(anyhow::anyhow!("Email to {} was not delivered", recipient)),
    }
}

async fn preview(
    state: &AppState,
    template: String,
    data: Option<String>,
) -> Result<(), anyhow::Error> {
    let message = Message::default()
        .with_template(template)
        .with_data(parse_data(data.as_deref())?);

    let message = state.sender.normalize(&message);
    let rendered = state.sender.render(&message).await?;

    println!("===== {}.html =====\n{}\n", message.template, rendered.html);
    println!("===== {}.plain =====\n{}", message.template, rendered.plain);

    Ok(())
}

pub fn setup_tracing() -> WorkerGuard {
    let env_filter = if cfg!(debug_assertions) {
        "debug,lettre=info,tera=info,html5ever=off,selectors=off"
    } else {
        "info"
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(env_filter));

    let file_appender = tracing_appender::rolling::daily("./logs", "courier.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_writer(std::io::stderr);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}
