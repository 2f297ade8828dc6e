mod app;
use app::{App, Args};
use clap::Parser;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let app = App::new(Args::parse())?;
    app.run()?;

    Ok(())
}
