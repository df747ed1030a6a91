pub mod state;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre;
use time::{Date, macros::format_description};
use tracing_subscriber::EnvFilter;

use crate::state::AppState;
use lexis_domain::{DateRange, Filters};
use lexis_service::RetrieveRequest;

#[derive(Debug, Parser)]
#[command(version, rename_all = "kebab", about = "Query the Lexis retrieval core.")]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
#[command(rename_all = "kebab")]
pub enum Command {
	/// Retrieve ranked chunks for a question and print them as JSON.
	Retrieve(RetrieveArgs),
	/// Drop cached answers that cite a document.
	Invalidate {
		#[arg(long, value_name = "ID")]
		doc_id: String,
	},
	/// Drop every cached answer.
	ClearCache,
	/// Delete expired rows from the shared cache table.
	PurgeExpired,
}

#[derive(Debug, clap::Args)]
#[command(rename_all = "kebab")]
pub struct RetrieveArgs {
	pub query: String,
	#[arg(long, short = 'm', default_value = "balanced")]
	pub mode: String,
	#[arg(long, short = 'k', default_value_t = 5)]
	pub top_k: u32,
	#[arg(long = "doc-type", value_name = "TYPE")]
	pub doc_types: Vec<String>,
	#[arg(long = "category", value_name = "CATEGORY")]
	pub categories: Vec<String>,
	/// Earliest issue date, inclusive (YYYY-MM-DD).
	#[arg(long, value_parser = parse_date)]
	pub from: Option<Date>,
	/// Latest issue date, inclusive (YYYY-MM-DD).
	#[arg(long, value_parser = parse_date)]
	pub to: Option<Date>,
}
impl RetrieveArgs {
	fn into_request(self) -> RetrieveRequest {
		let date_range = (self.from.is_some() || self.to.is_some())
			.then_some(DateRange { from: self.from, to: self.to });
		let filters = Filters {
			doc_types: self.doc_types.into_iter().collect(),
			categories: self.categories.into_iter().collect(),
			date_range,
			status: None,
		};

		RetrieveRequest { query: self.query, mode: self.mode, filters, top_k: self.top_k }
	}
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = lexis_config::load(&args.config)?;

	init_tracing(&config)?;

	let state = AppState::new(&config).await?;

	match args.command {
		Command::Retrieve(retrieve) => {
			let answer = state.service.retrieve_request(retrieve.into_request()).await?;

			println!("{}", serde_json::to_string_pretty(&answer)?);
		},
		Command::Invalidate { doc_id } => {
			let invalidated = state.service.invalidate_by_document(&doc_id).await;

			println!(
				"{}",
				serde_json::json!({ "doc_id": doc_id, "l2_entries": invalidated.l2_entries })
			);
		},
		Command::ClearCache => {
			let invalidated = state.service.clear_all().await;

			println!("{}", serde_json::json!({ "l2_entries": invalidated.l2_entries }));
		},
		Command::PurgeExpired => {
			let Some(l2) = state.l2.as_ref() else {
				return Err(eyre::eyre!("purge-expired requires storage.postgres."));
			};
			let purged = l2.purge_expired().await?;

			println!("{}", serde_json::json!({ "purged": purged }));
		},
	}

	Ok(())
}

fn init_tracing(config: &lexis_config::Config) -> color_eyre::Result<()> {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

	Ok(())
}

fn parse_date(raw: &str) -> Result<Date, String> {
	Date::parse(raw, format_description!("[year]-[month]-[day]"))
		.map_err(|err| format!("Expected YYYY-MM-DD: {err}."))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn retrieve_args_build_request() {
		let args = Args::try_parse_from([
			"lexis-query",
			"-c",
			"lexis.toml",
			"retrieve",
			"bid security deposit",
			"--mode",
			"quality",
			"--doc-type",
			"decree",
			"--doc-type",
			"law",
			"--from",
			"2023-01-01",
		])
		.expect("args");
		let Command::Retrieve(retrieve) = args.command else {
			panic!("Expected the retrieve command.");
		};
		let request = retrieve.into_request();

		assert_eq!(request.mode, "quality");
		assert_eq!(request.top_k, 5);
		assert_eq!(request.filters.doc_types.len(), 2);
		assert_eq!(
			request.filters.date_range.and_then(|range| range.from).map(|date| date.to_string()),
			Some("2023-01-01".to_string())
		);
		assert_eq!(request.filters.date_range.and_then(|range| range.to), None);
	}

	#[test]
	fn malformed_dates_are_rejected() {
		let result = Args::try_parse_from([
			"lexis-query",
			"-c",
			"lexis.toml",
			"retrieve",
			"bid",
			"--to",
			"01/02/2024",
		]);

		assert!(result.is_err());
	}

	#[test]
	fn invalidate_requires_doc_id() {
		assert!(Args::try_parse_from(["lexis-query", "-c", "x.toml", "invalidate"]).is_err());

		let args =
			Args::try_parse_from(["lexis-query", "-c", "x.toml", "invalidate", "--doc-id", "d1"])
				.expect("args");

		assert!(matches!(args.command, Command::Invalidate { doc_id } if doc_id == "d1"));
	}
}
