use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nextup_data::{
    config::Config,
    models::{query::ListQuery, record::ItemType},
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置
    dotenv::dotenv().ok();
    let config = Config::from_env()?;

    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting NextUP data layer ({})", config.environment);

    let table = std::env::args().nth(1).unwrap_or_else(|| "projects".to_string());
    let item_type: ItemType = ItemType::from_table(&table)
        .with_context(|| format!("unknown table: {}", table))?;

    let state = AppState::init(config.clone()).context("failed to initialise data layer")?;
    state.auth.restore(None).await.context("failed to resolve session")?;
    info!(
        "Data source: {}",
        if state.is_live() { "remote store" } else { "demo data" }
    );

    let query = ListQuery::new().per_page(config.default_per_page);
    let listing = match state.data.list_items(item_type, &query).await {
        Ok(listing) => listing,
        Err(e) => {
            error!("Failed to list {}: {}", table, e);
            return Err(anyhow::anyhow!(e.user_message()));
        }
    };

    println!(
        "{} ({} of {}, page {}/{})",
        table,
        listing.records.len(),
        listing.total,
        listing.page,
        listing.page_count().max(1)
    );
    for item in &listing.records {
        let card = item.card();
        println!("[{}] {} ({})", card.badge, card.title, card.id);
        if let Some(subtitle) = &card.subtitle {
            println!("    {}", subtitle);
        }
        for (label, value) in &card.details {
            println!("    {}: {}", label, value);
        }
        if !card.tags.is_empty() {
            println!("    #{}", card.tags.join(" #"));
        }
    }

    Ok(())
}
