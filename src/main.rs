use anyhow::Context;
use stockbook_app::Application;
use stockbook_kernel::settings::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().with_context(|| "failed to load stockbook settings")?;
    stockbook_telemetry::init(&settings.telemetry)?;

    tracing::info!(
        env = ?settings.environment,
        db = %settings.database.url,
        time_zone = %settings.inventory.time_zone,
        "stockbook bootstrap starting"
    );

    let app = Application::bootstrap(settings).await?;
    tracing::info!("stockbook bootstrap complete");

    app.serve().await
}
