//! HTTP-backed exchange-rate and country lookups.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

use expensa_core::config::CurrencyConfig;
use expensa_core::currency::{
    Country, CountryDirectory, CurrencyCode, CurrencyError, CurrencyInfo, ExchangeRates,
    RateProvider,
};

#[derive(Debug, Deserialize)]
struct RatesPayload {
    base: String,
    date: Option<String>,
    rates: BTreeMap<String, serde_json::Number>,
}

#[derive(Debug, Deserialize)]
struct CountryPayload {
    name: CountryName,
    #[serde(default)]
    currencies: BTreeMap<String, CurrencyInfo>,
}

#[derive(Debug, Deserialize)]
struct CountryName {
    common: String,
}

pub fn http_client(timeout_secs: u64) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(Duration::from_secs(timeout_secs.max(1))).build()
}

#[derive(Clone, Debug)]
pub struct HttpRateProvider {
    client: Client,
    base_url: String,
}

impl HttpRateProvider {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    pub fn from_config(client: Client, config: &CurrencyConfig) -> Self {
        Self::new(client, config.rates_base_url.clone())
    }
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    async fn latest(&self, base: &CurrencyCode) -> Result<ExchangeRates, CurrencyError> {
        let url = format!("{}/{}", self.base_url, base);
        let payload: RatesPayload = fetch_json(&self.client, &url).await?;

        let mut rates = BTreeMap::new();
        for (code, value) in payload.rates {
            let rate = Decimal::from_str(&value.to_string())
                .or_else(|_| Decimal::from_scientific(&value.to_string()))
                .map_err(|error| CurrencyError::Provider(format!("rate for {code}: {error}")))?;
            rates.insert(code.to_ascii_uppercase(), rate);
        }

        let base = CurrencyCode::parse(&payload.base).unwrap_or_else(|_| base.clone());
        Ok(ExchangeRates { base, date: payload.date, rates })
    }
}

#[derive(Clone, Debug)]
pub struct HttpCountryDirectory {
    client: Client,
    base_url: String,
}

impl HttpCountryDirectory {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    pub fn from_config(client: Client, config: &CurrencyConfig) -> Self {
        Self::new(client, config.countries_base_url.clone())
    }
}

#[async_trait]
impl CountryDirectory for HttpCountryDirectory {
    async fn countries(&self) -> Result<Vec<Country>, CurrencyError> {
        let url = format!("{}/all?fields=name,currencies", self.base_url);
        let payload: Vec<CountryPayload> = fetch_json(&self.client, &url).await?;

        Ok(payload
            .into_iter()
            .map(|country| Country { name: country.name.common, currencies: country.currencies })
            .collect())
    }
}

async fn fetch_json<T: serde::de::DeserializeOwned>(
    client: &Client,
    url: &str,
) -> Result<T, CurrencyError> {
    let response = client.get(url).send().await.map_err(|error| {
        tracing::warn!(event_name = "currency.lookup.failed", url, error = %error, "lookup failed");
        CurrencyError::Provider(error.to_string())
    })?;

    let response = response
        .error_for_status()
        .map_err(|error| CurrencyError::Provider(error.to_string()))?;

    response
        .json::<T>()
        .await
        .map_err(|error| CurrencyError::Provider(format!("unexpected payload: {error}")))
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use expensa_core::currency::{CountryDirectory, CurrencyCode, CurrencyError, RateProvider};

    use super::{http_client, HttpCountryDirectory, HttpRateProvider};

    fn code(raw: &str) -> CurrencyCode {
        CurrencyCode::parse(raw).expect("code")
    }

    #[tokio::test]
    async fn rates_are_fetched_per_base_currency() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/latest/USD"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "base": "USD",
                "date": "2026-10-01",
                "rates": {"USD": 1, "EUR": 0.5, "inr": 83.25}
            })))
            .mount(&server)
            .await;

        let provider =
            HttpRateProvider::new(http_client(5).expect("client"), format!("{}/v4/latest/", server.uri()));
        let rates = provider.latest(&code("USD")).await.expect("rates");

        assert_eq!(rates.base, code("USD"));
        assert_eq!(rates.date.as_deref(), Some("2026-10-01"));
        assert_eq!(rates.rate_for(&code("EUR")), Some(Decimal::new(5, 1)));
        assert_eq!(rates.rate_for(&code("INR")), Some(Decimal::new(8325, 2)));
    }

    #[tokio::test]
    async fn upstream_errors_surface_as_provider_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let provider = HttpRateProvider::new(http_client(5).expect("client"), server.uri());
        let error = provider.latest(&code("GBP")).await.expect_err("502");

        assert!(matches!(error, CurrencyError::Provider(_)));
    }

    #[tokio::test]
    async fn countries_keep_common_name_and_currencies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3.1/all"))
            .and(query_param("fields", "name,currencies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "name": {"common": "Germany", "official": "Federal Republic of Germany"},
                    "currencies": {"EUR": {"name": "Euro", "symbol": "€"}}
                },
                {"name": {"common": "Antarctica"}, "currencies": {}}
            ])))
            .mount(&server)
            .await;

        let directory =
            HttpCountryDirectory::new(http_client(5).expect("client"), format!("{}/v3.1", server.uri()));
        let countries = directory.countries().await.expect("countries");

        assert_eq!(countries.len(), 2);
        assert_eq!(countries[0].name, "Germany");
        assert_eq!(countries[0].currencies["EUR"].symbol.as_deref(), Some("€"));
        assert!(countries[1].currencies.is_empty());
    }
}
