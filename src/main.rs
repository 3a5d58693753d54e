use clap::{Parser, Subcommand};
use dotenv::dotenv;
use ext_updater::updater::app;
use ext_updater::updater::config::Config;
use ext_updater::updater::status;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Tag a JSON state as an external update request
    Start {
        /// The raw JSON state
        #[arg(default_value = "{}")]
        state: String,
    },
    /// Tag a JSON state as successful or failed
    Stop {
        /// The raw JSON state, with a `successful` field
        #[arg(default_value = "{}")]
        state: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match args.command {
        Some(Commands::Start { state }) => {
            log::info!("Running cli: start {}", state);
            println!("{}", status::start(&state)?);
        }
        Some(Commands::Stop { state }) => {
            log::info!("Running cli: stop {}", state);
            println!("{}", status::stop(&state)?);
        }
        None => {
            let config = Config::from_env()?;
            app::serve(config).await;
        }
    }

    Ok(())
}
