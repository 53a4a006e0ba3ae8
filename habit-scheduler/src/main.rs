use habit_scheduler::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();
    let settings = Config::from_env()?.validate()?;
    habit_scheduler::web::start(settings).await
}
