use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use phisherman::bank::QuestionBank;
use phisherman::store::StoreSettings;
use phisherman::trainer::{Trainer, format_lesson};
use phisherman::{config, gateway};

#[derive(Parser)]
#[command(name = "phisherman")]
#[command(about = "Phishing-awareness training: real-time quiz gateway and terminal trainer")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the quiz gateway server
    Serve {
        /// Port to bind to (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,

        /// Auth token (required for non-loopback)
        #[arg(long, env = "PHISHERMAN_TOKEN")]
        token: Option<String>,
    },

    /// List lesson topics
    Topics,

    /// Print the lesson for one topic
    Teach {
        /// Topic id, e.g. suspicious_link
        topic: String,
    },

    /// Interactive terminal trainer
    Trainer,

    /// Show version and effective quiz settings
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = config::load()?;

    match cli.command {
        Commands::Serve { port, bind, token } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(bind) = bind {
                config.gateway.bind = bind;
            }
            gateway::run(config, token).await
        }
        Commands::Topics => {
            let bank = QuestionBank::builtin();
            for topic in bank.topics() {
                println!("{:<22} {}", topic.id, topic.title);
            }
            Ok(())
        }
        Commands::Teach { topic } => {
            let bank = QuestionBank::builtin();
            match bank.get_topic(&topic) {
                Some(t) => {
                    println!("{}", format_lesson(t));
                    Ok(())
                }
                None => anyhow::bail!(
                    "unknown topic '{topic}': expected one of {:?}",
                    bank.list_topics()
                ),
            }
        }
        Commands::Trainer => {
            let bank = Arc::new(QuestionBank::builtin());
            let settings = StoreSettings::from(&config.quiz);
            tokio::task::spawn_blocking(move || {
                let stdin = std::io::stdin();
                Trainer::new(bank, settings, stdin.lock(), std::io::stdout()).run()
            })
            .await?
        }
        Commands::Status => {
            println!("phisherman v{}", env!("CARGO_PKG_VERSION"));
            println!("max questions: {}", config.quiz.max_questions);
            println!("session ttl:   {}s", config.quiz.session_ttl_secs);
            println!("default topic: {}", config.quiz.default_topic);
            println!(
                "audit log:     {}",
                if config.audit.enabled {
                    config.audit.path.display().to_string()
                } else {
                    "disabled".to_string()
                }
            );
            Ok(())
        }
    }
}
