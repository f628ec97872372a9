use anyhow::Result;
use burgerweek::{
    cache::Client,
    cli::{Cli, Commands},
    maintenance, open_now,
    pipeline::Pipeline,
    scrape::Endpoints,
};
use chrono::{Datelike, Local, Timelike};
use std::sync::Arc;
use tracing::{error, info};

#[cfg(all(target_env = "musl", target_pointer_width = "64"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse_args();
    cli.init_logger()?;

    let client = Client::build(cli.cache_opts()).await?;
    let pipeline = Pipeline::new(
        client.clone(),
        Endpoints::default(),
        cli.paths(),
        cli.geocode_opts(),
    );

    let res = run(&cli, Arc::new(pipeline)).await;
    if let Err(e) = &res {
        error!(err = %e, "Command failed");
    }

    // keep whatever was fetched, also when the command failed
    if let Err(e) = client.save().await {
        error!(err = %e, "Failed to save cache");
    }
    res
}

async fn run(cli: &Cli, pipeline: Arc<Pipeline>) -> Result<()> {
    match &cli.command {
        Commands::Scrape => {
            pipeline.scrape().await?;
        }
        Commands::Geocode(_) => {
            // being blocked is reported, but is not a failure
            pipeline.geocode().await?;
        }
        Commands::Images => {
            pipeline.images().await?;
        }
        Commands::Run { cron: None, .. } => pipeline.run_all().await?,
        Commands::Run {
            cron: Some(cron), ..
        } => pipeline.run_scheduled(cron).await?,
        Commands::Open { at } => {
            let (day, minutes) = match at {
                Some((day, time)) => (*day, time.hour() * 60 + time.minute()),
                None => {
                    let now = Local::now();
                    (now.weekday(), now.hour() * 60 + now.minute())
                }
            };
            let records = pipeline.store().load()?;
            let open: Vec<_> = records
                .iter()
                .filter(|r| open_now::is_open(r.hours.as_ref(), day, minutes))
                .collect();
            info!(
                open = open.len(),
                total = records.len(),
                "Open on {day} at {:02}:{:02}",
                minutes / 60,
                minutes % 60
            );
            for r in open {
                println!("{r}");
            }
        }
        Commands::CleanAddresses => {
            maintenance::clean_addresses(pipeline.store())?;
        }
        Commands::RefreshNeighborhoods => {
            maintenance::refresh_neighborhoods(
                pipeline.client(),
                pipeline.endpoints(),
                pipeline.store(),
            )
            .await?;
        }
    }
    Ok(())
}
