#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = school_progression::run_worker().await {
        eprintln!("progression-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
