use std::env;
use std::path::PathBuf;

use crate::delivery::{PacingBounds, PacingPolicy};
use crate::encoding::TextEncoding;
use crate::types::Goals;

const DEFAULT_SPREADSHEET_ENCODINGS: &str = "utf-8,latin1,iso-8859-1,ascii,utf-16,utf-32,cp1252";
const DEFAULT_DELIMITED_ENCODINGS: &str = "latin1,iso-8859-1,utf-8";

#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub path: PathBuf,
    pub encodings: Vec<TextEncoding>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sources {
    pub sales: SourceConfig,
    pub stores: SourceConfig,
    pub contacts: SourceConfig,
    pub delimiter: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub sender: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryConfig {
    Smtp(SmtpSettings),
    /// Dry run: messages are written to this directory.
    Outbox(PathBuf),
}

/// What the pipeline itself needs, independent of sources and transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportSettings {
    pub goals: Goals,
    pub report_kind: String,
    pub management_email: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub sources: Sources,
    pub report: ReportSettings,
    pub pacing: PacingPolicy,
    pub delivery: DeliveryConfig,
    pub backup_dir: PathBuf,
    pub currency_locale: String,
    pub currency_prefix: String,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let delimiter = match vars.get("CSV_DELIMITER") {
            None => b';',
            Some(d) if d.len() == 1 && d.is_ascii() => d.as_bytes()[0],
            Some(d) => {
                return Err(ConfigError::Invalid {
                    key: "CSV_DELIMITER",
                    value: d,
                    reason: "expected a single ASCII character".to_string(),
                })
            }
        };
        let sources = Sources {
            sales: vars.source("SALES_PATH", "SALES_ENCODINGS", DEFAULT_SPREADSHEET_ENCODINGS)?,
            stores: vars.source("STORES_PATH", "STORES_ENCODINGS", DEFAULT_DELIMITED_ENCODINGS)?,
            contacts: vars.source(
                "CONTACTS_PATH",
                "CONTACTS_ENCODINGS",
                DEFAULT_SPREADSHEET_ENCODINGS,
            )?,
            delimiter,
        };

        let goals = Goals {
            daily_sales: vars.parsed("GOAL_DAILY_SALES", 0.0)?,
            annual_sales: vars.parsed("GOAL_ANNUAL_SALES", 0.0)?,
            daily_quantity: vars.parsed("GOAL_DAILY_QUANTITY", 0.0)?,
            annual_quantity: vars.parsed("GOAL_ANNUAL_QUANTITY", 0.0)?,
            daily_avg_ticket: vars.parsed("GOAL_DAILY_AVG_TICKET", 0.0)?,
            annual_avg_ticket: vars.parsed("GOAL_ANNUAL_AVG_TICKET", 0.0)?,
            product_diversity: vars.optional_parsed("GOAL_PRODUCT_DIVERSITY")?,
        };

        let report = ReportSettings {
            goals,
            report_kind: vars.get("REPORT_KIND").unwrap_or_else(|| "One Page".to_string()),
            management_email: vars.required("MANAGEMENT_EMAIL")?,
        };

        let pacing = PacingPolicy {
            store: vars.pacing("STORE_PACING_SECS", (40, 68))?,
            management: vars.pacing("MANAGEMENT_PACING_SECS", (45, 68))?,
        };

        let delivery = match vars.get("OUTBOX_DIR") {
            Some(dir) => DeliveryConfig::Outbox(PathBuf::from(dir)),
            None => {
                let username = vars.required("SMTP_USERNAME")?;
                DeliveryConfig::Smtp(SmtpSettings {
                    host: vars.get("SMTP_HOST").unwrap_or_else(|| "smtp.gmail.com".to_string()),
                    port: vars.parsed("SMTP_PORT", 587)?,
                    password: vars.required("SMTP_PASSWORD")?,
                    sender: vars.get("SENDER_EMAIL").unwrap_or_else(|| username.clone()),
                    username,
                })
            }
        };

        Ok(Config {
            sources,
            report,
            pacing,
            delivery,
            backup_dir: PathBuf::from(vars.get("BACKUP_DIR").unwrap_or_else(|| "backup".to_string())),
            currency_locale: vars.get("CURRENCY_LOCALE").unwrap_or_else(|| "pt".to_string()),
            currency_prefix: vars.get("CURRENCY_PREFIX").unwrap_or_else(|| "R$ ".to_string()),
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Blank values count as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parsed<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.optional_parsed(key)?.unwrap_or(default))
    }

    fn optional_parsed<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|v| {
                v.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                    key,
                    value: v.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn source(
        &self,
        path_key: &'static str,
        encodings_key: &'static str,
        default_encodings: &str,
    ) -> Result<SourceConfig, ConfigError> {
        let path = PathBuf::from(self.required(path_key)?);
        let list = self
            .get(encodings_key)
            .unwrap_or_else(|| default_encodings.to_string());
        let encodings = TextEncoding::parse_list(&list).map_err(|e| ConfigError::Invalid {
            key: encodings_key,
            value: list.clone(),
            reason: e.to_string(),
        })?;
        if encodings.is_empty() {
            return Err(ConfigError::Invalid {
                key: encodings_key,
                value: list,
                reason: "at least one encoding is required".to_string(),
            });
        }
        Ok(SourceConfig { path, encodings })
    }

    /// `"40-68"` (seconds, inclusive) or a single `"30"`.
    fn pacing(&self, key: &'static str, default: (u64, u64)) -> Result<PacingBounds, ConfigError> {
        let Some(value) = self.get(key) else {
            return Ok(PacingBounds::from_secs(default.0, default.1));
        };
        let invalid = |reason: &str| ConfigError::Invalid {
            key,
            value: value.clone(),
            reason: reason.to_string(),
        };
        let (min, max) = match value.split_once('-') {
            Some((lo, hi)) => (lo.trim().parse::<u64>(), hi.trim().parse::<u64>()),
            None => (value.trim().parse::<u64>(), value.trim().parse::<u64>()),
        };
        match (min, max) {
            (Ok(min), Ok(max)) if min <= max => Ok(PacingBounds::from_secs(min, max)),
            (Ok(_), Ok(_)) => Err(invalid("lower bound exceeds upper bound")),
            _ => Err(invalid("expected seconds as \"min-max\"")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn base() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("SALES_PATH", "data/Vendas.xlsx"),
            ("STORES_PATH", "data/Lojas.csv"),
            ("CONTACTS_PATH", "data/Emails.xlsx"),
            ("MANAGEMENT_EMAIL", "board@example.com"),
            ("SMTP_USERNAME", "reports@example.com"),
            ("SMTP_PASSWORD", "secret"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|k| vars.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_match_the_reference_run() {
        let config = load(&base()).unwrap();
        assert_eq!(config.sources.delimiter, b';');
        assert_eq!(
            config.sources.stores.encodings,
            vec![TextEncoding::Latin1, TextEncoding::Latin1, TextEncoding::Utf8]
        );
        assert_eq!(
            config.sources.sales.encodings,
            vec![
                TextEncoding::Utf8,
                TextEncoding::Latin1,
                TextEncoding::Latin1,
                TextEncoding::Ascii,
                TextEncoding::Utf16,
                TextEncoding::Utf32,
                TextEncoding::Windows1252,
            ]
        );
        assert_eq!(config.sources.contacts.encodings, config.sources.sales.encodings);
        assert_eq!(config.report.goals, Goals::default());
        assert_eq!(config.report.report_kind, "One Page");
        assert_eq!(config.pacing.store, PacingBounds::from_secs(40, 68));
        assert_eq!(config.pacing.management.min, Duration::from_secs(45));
        match config.delivery {
            DeliveryConfig::Smtp(smtp) => {
                assert_eq!(smtp.host, "smtp.gmail.com");
                assert_eq!(smtp.port, 587);
                assert_eq!(smtp.sender, "reports@example.com");
            }
            other => panic!("unexpected delivery {other:?}"),
        }
    }

    #[test]
    fn outbox_makes_smtp_keys_optional() {
        let mut vars = base();
        vars.remove("SMTP_USERNAME");
        vars.remove("SMTP_PASSWORD");
        vars.insert("OUTBOX_DIR", "out");
        let config = load(&vars).unwrap();
        assert_eq!(config.delivery, DeliveryConfig::Outbox(PathBuf::from("out")));
    }

    #[test]
    fn goals_and_pacing_are_parsed() {
        let mut vars = base();
        vars.insert("GOAL_DAILY_SALES", "1000");
        vars.insert("GOAL_PRODUCT_DIVERSITY", "4");
        vars.insert("STORE_PACING_SECS", "5");
        let config = load(&vars).unwrap();
        assert_eq!(config.report.goals.daily_sales, 1000.0);
        assert_eq!(config.report.goals.product_diversity, Some(4.0));
        assert_eq!(config.pacing.store, PacingBounds::from_secs(5, 5));
    }

    #[test]
    fn reports_the_offending_key() {
        let mut vars = base();
        vars.remove("MANAGEMENT_EMAIL");
        assert_eq!(load(&vars).unwrap_err(), ConfigError::Missing("MANAGEMENT_EMAIL"));

        let mut vars = base();
        vars.insert("STORE_PACING_SECS", "68-40");
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::Invalid { key: "STORE_PACING_SECS", .. }
        ));

        let mut vars = base();
        vars.insert("GOAL_ANNUAL_SALES", "lots");
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::Invalid { key: "GOAL_ANNUAL_SALES", .. }
        ));

        let mut vars = base();
        vars.insert("SALES_ENCODINGS", "ebcdic");
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::Invalid { key: "SALES_ENCODINGS", .. }
        ));
    }
}
