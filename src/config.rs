use serde::Deserialize;

/// Runtime configuration, sourced from the environment.
///
/// Amounts are integer currency units; `cashback_base_rate` is a whole
/// percentage (2 = 2%).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub welcome_bonus: i64,
    pub cashback_base_rate: i64,
    pub min_promo_amount: i64,
    pub promo_validity_days: i64,
    pub referral_bonus: i64,
    pub admin_privilege_level: i32,
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .set_default("server_port", 8000)?
            .set_default("welcome_bonus", 500)?
            .set_default("cashback_base_rate", 2)?
            .set_default("min_promo_amount", 100)?
            .set_default("promo_validity_days", 30)?
            .set_default("referral_bonus", 1000)?
            .set_default("admin_privilege_level", 3)?
            .set_default("rate_limit_max", 30)?
            .set_default("rate_limit_window_secs", 300)?
            .add_source(config::Environment::default())
            .build()?;
        config.try_deserialize()
    }
}
