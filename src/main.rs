#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = school_progression::run().await {
        eprintln!("school-progression fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
