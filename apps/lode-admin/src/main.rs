use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = lode_admin::Args::parse();

	lode_admin::run(args).await
}
