use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = lexis_query::Args::parse();

	lexis_query::run(args).await
}
