use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Failed to read config file {}.", path.display())]
	ReadConfig { path: PathBuf, source: std::io::Error },
	#[error("Failed to parse config file {}.", path.display())]
	ParseConfig { path: PathBuf, source: toml::de::Error },
	/// A loaded value violates a constraint. `key` is the dotted TOML path of the offending value.
	#[error("{key} {rule}.")]
	Validation { key: String, rule: String },
}
impl Error {
	pub(crate) fn invalid(key: impl Into<String>, rule: impl Into<String>) -> Self {
		Self::Validation { key: key.into(), rule: rule.into() }
	}
}
