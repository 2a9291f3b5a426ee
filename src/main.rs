use clap::Parser;
use repo_harvest_app::Args;

#[tokio::main]
async fn main() -> harvest::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    repo_harvest_app::run(args).await
}
