//! Handle-aware payments over an external ledger client, and SEP-0007 payment URIs.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;

use crate::config::Environment;
use crate::error::{MiniPayError, MiniPayResult, ValidationKind};
use crate::handles::{is_handle, normalize_handle, validate_handle, HandleRegistry};
use crate::keys::{shorten_address, validate_address, WalletKeypair};

/// Asset code of the payment stablecoin.
pub const USDC_CODE: &str = "USDC";
/// Issuer of the payment stablecoin on the test network.
pub const USDC_ISSUER: &str = "GBBD47IF6LWK7P7MDEVSCWR7DPUWV3NY3DTQEVFL4NAT4AQH3ZLLFLA5";

const MAX_AMOUNT_DECIMALS: usize = 7;
const MAX_MEMO_BYTES: usize = 28;
const URI_SCHEME: &str = "web+stellar";
const URI_OPERATION: &str = "pay";

/// A payment ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    /// Resolved `G...` destination.
    pub destination: String,
    /// Decimal amount, at most 7 fraction digits.
    pub amount: String,
    /// Asset code.
    pub asset_code: String,
    /// Asset issuer.
    pub asset_issuer: String,
    /// Text memo.
    pub memo: Option<String>,
}

/// One balance line of an account.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Balance {
    /// Asset code (`XLM` for the native asset).
    pub asset_code: String,
    /// Decimal amount.
    pub amount: String,
}

/// Result of a submitted payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    /// Ledger transaction id.
    pub transaction_id: String,
    /// The payment as submitted.
    pub payment: Payment,
}

/// Capability to talk to the payment network.
///
/// Transaction building, fees and envelope encoding are the client's business.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Signs `payment` with `source` and submits it. Returns the transaction id.
    ///
    /// # Errors
    ///
    /// Returns an error if the network rejects or cannot receive the payment.
    async fn submit_payment(
        &self,
        source: &WalletKeypair,
        payment: &Payment,
    ) -> MiniPayResult<String>;

    /// Balances of `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the account cannot be queried.
    async fn balances(&self, address: &str) -> MiniPayResult<Vec<Balance>>;
}

/// Checks that `raw` is a positive decimal amount with at most 7 fraction digits.
///
/// # Errors
///
/// Returns [`ValidationKind::Amount`] otherwise.
pub fn validate_amount(raw: &str) -> MiniPayResult<String> {
    let amount = raw.trim();
    let invalid = || ValidationKind::Amount(raw.to_string());

    let (whole, fraction) = amount.split_once('.').unwrap_or((amount, ""));
    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if whole.is_empty()
        || !all_digits(whole)
        || !all_digits(fraction)
        || fraction.len() > MAX_AMOUNT_DECIMALS
        || (amount.contains('.') && fraction.is_empty())
    {
        return Err(invalid().into());
    }
    if whole.bytes().chain(fraction.bytes()).all(|b| b == b'0') {
        return Err(invalid().into());
    }
    Ok(amount.to_string())
}

fn validate_memo(memo: Option<&str>) -> MiniPayResult<Option<String>> {
    match memo.map(str::trim).filter(|memo| !memo.is_empty()) {
        Some(memo) if memo.len() > MAX_MEMO_BYTES => Err(ValidationKind::Memo(memo.len()).into()),
        other => Ok(other.map(str::to_string)),
    }
}

/// Sends payments to handles or raw addresses.
pub struct PaymentRouter {
    handles: Arc<HandleRegistry>,
    ledger: Arc<dyn LedgerClient>,
}

impl PaymentRouter {
    /// Creates a router.
    #[must_use]
    pub fn new(handles: Arc<HandleRegistry>, ledger: Arc<dyn LedgerClient>) -> Self {
        Self { handles, ledger }
    }

    /// Turns `alice`, `alice@minipay` or `G...` into a destination address.
    ///
    /// Handles are resolved from the device cache, then from the durable store.
    ///
    /// # Errors
    ///
    /// Returns [`MiniPayError::NotFound`] for an unknown handle and a validation
    /// error for anything that is neither a handle nor an address.
    pub async fn resolve_recipient(&self, recipient: &str) -> MiniPayResult<String> {
        let recipient = recipient.trim();
        if !is_handle(recipient) {
            return Ok(recipient.to_string());
        }

        let handle = validate_handle(&normalize_handle(recipient))?;
        let resolved = match self.handles.resolve(&handle)? {
            Some(address) => Some(address),
            None => self.handles.resolve_durable(&handle).await?,
        };
        let address =
            resolved.ok_or_else(|| MiniPayError::NotFound(format!("handle `{handle}`")))?;
        validate_address(&address)?;
        Ok(address)
    }

    /// Sends `amount` USDC from `source` to `recipient`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad amount, memo or recipient, and
    /// whatever the ledger client reports for the submission.
    pub async fn send(
        &self,
        source: &WalletKeypair,
        recipient: &str,
        amount: &str,
        memo: Option<&str>,
    ) -> MiniPayResult<PaymentReceipt> {
        let amount = validate_amount(amount)?;
        let memo = validate_memo(memo)?;
        let destination = self.resolve_recipient(recipient).await?;

        let payment = Payment {
            destination,
            amount,
            asset_code: USDC_CODE.to_string(),
            asset_issuer: USDC_ISSUER.to_string(),
            memo,
        };
        let transaction_id = self.ledger.submit_payment(source, &payment).await?;
        log::info!(
            "[PAYMENT] sent {} {} to {}",
            payment.amount,
            payment.asset_code,
            self.handles.format_recipient(&payment.destination)
        );

        Ok(PaymentReceipt {
            transaction_id,
            payment,
        })
    }

    /// Balances of `address`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed address and whatever the
    /// ledger client reports.
    pub async fn balances(&self, address: &str) -> MiniPayResult<Vec<Balance>> {
        validate_address(address)?;
        log::debug!("[PAYMENT] balances of {}", shorten_address(address));
        self.ledger.balances(address).await
    }
}

/// A SEP-0007 `web+stellar:pay` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentUri {
    /// Destination address.
    pub destination: String,
    /// Requested amount.
    pub amount: String,
    /// Text memo.
    pub memo: Option<String>,
    /// Asset code, `USDC` when absent from the URI.
    pub asset_code: String,
    /// Asset issuer, if given.
    pub asset_issuer: Option<String>,
    /// Network passphrase; absent means the public network.
    pub network_passphrase: Option<String>,
}

impl PaymentUri {
    /// A USDC payment request.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad destination, amount or memo.
    pub fn usdc(destination: &str, amount: &str, memo: Option<&str>) -> MiniPayResult<Self> {
        validate_address(destination)?;
        Ok(Self {
            destination: destination.to_string(),
            amount: validate_amount(amount)?,
            memo: validate_memo(memo)?,
            asset_code: USDC_CODE.to_string(),
            asset_issuer: Some(USDC_ISSUER.to_string()),
            network_passphrase: None,
        })
    }

    /// Targets the request at `environment`'s network.
    ///
    /// The passphrase is only written for networks other than the public one.
    #[must_use]
    pub fn on_network(mut self, environment: Environment) -> Self {
        self.network_passphrase = match environment {
            Environment::Production => None,
            Environment::Staging => Some(environment.network_passphrase().to_string()),
        };
        self
    }

    /// Network the request targets, `None` for an unknown passphrase.
    #[must_use]
    pub fn environment(&self) -> Option<Environment> {
        match self.network_passphrase.as_deref() {
            None => Some(Environment::Production),
            Some(passphrase) => [Environment::Staging, Environment::Production]
                .into_iter()
                .find(|env| env.network_passphrase() == passphrase),
        }
    }

    /// Renders `web+stellar:pay?destination=...&amount=...`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationKind::PaymentUri`] if the URI cannot be assembled.
    pub fn to_uri(&self) -> MiniPayResult<String> {
        let mut url = Url::parse(&format!("{URI_SCHEME}:{URI_OPERATION}"))
            .map_err(|e| ValidationKind::PaymentUri(e.to_string()))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("destination", &self.destination)
                .append_pair("amount", &self.amount)
                .append_pair("asset_code", &self.asset_code);
            if let Some(issuer) = &self.asset_issuer {
                pairs.append_pair("asset_issuer", issuer);
            }
            if let Some(memo) = &self.memo {
                pairs
                    .append_pair("memo", memo)
                    .append_pair("memo_type", "MEMO_TEXT");
            }
            if let Some(passphrase) = &self.network_passphrase {
                pairs.append_pair("network_passphrase", passphrase);
            }
        }
        Ok(url.into())
    }

    /// Parses a `web+stellar:pay` URI.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationKind::PaymentUri`] if the URI is not a pay request with
    /// a destination and an amount.
    pub fn parse(uri: &str) -> MiniPayResult<Self> {
        let invalid = |reason: &str| ValidationKind::PaymentUri(reason.to_string());

        let url = Url::parse(uri.trim()).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != URI_SCHEME || url.path() != URI_OPERATION {
            return Err(invalid("not a web+stellar:pay uri").into());
        }

        let mut destination = None;
        let mut amount = None;
        let mut memo = None;
        let mut asset_code = None;
        let mut asset_issuer = None;
        let mut network_passphrase = None;
        for (key, value) in url.query_pairs() {
            let value = value.into_owned();
            match key.as_ref() {
                "destination" => destination = Some(value),
                "amount" => amount = Some(value),
                "memo" => memo = Some(value),
                "asset_code" => asset_code = Some(value),
                "asset_issuer" => asset_issuer = Some(value),
                "network_passphrase" => network_passphrase = Some(value),
                _ => {}
            }
        }

        let destination = destination
            .filter(|d| !d.is_empty())
            .ok_or_else(|| invalid("missing destination"))?;
        let amount = amount
            .filter(|a| !a.is_empty())
            .ok_or_else(|| invalid("missing amount"))?;

        Ok(Self {
            destination,
            amount,
            memo,
            asset_code: asset_code.unwrap_or_else(|| USDC_CODE.to_string()),
            asset_issuer,
            network_passphrase,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::derive_keypair;
    use crate::storage::{MemoryDurableStore, MemoryKeyValueStore};
    use std::sync::Mutex;
    use test_case::test_case;

    #[derive(Default)]
    struct FakeLedger {
        submitted: Mutex<Vec<Payment>>,
    }

    #[async_trait]
    impl LedgerClient for FakeLedger {
        async fn submit_payment(
            &self,
            _source: &WalletKeypair,
            payment: &Payment,
        ) -> MiniPayResult<String> {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(payment.clone());
            Ok(format!("tx-{}", submitted.len()))
        }

        async fn balances(&self, _address: &str) -> MiniPayResult<Vec<Balance>> {
            Ok(vec![Balance {
                asset_code: USDC_CODE.to_string(),
                amount: "12.5".to_string(),
            }])
        }
    }

    fn router() -> (Arc<HandleRegistry>, Arc<FakeLedger>, PaymentRouter) {
        let handles = Arc::new(HandleRegistry::new(
            Arc::new(MemoryKeyValueStore::new()),
            Arc::new(MemoryDurableStore::new()),
        ));
        let ledger = Arc::new(FakeLedger::default());
        let router = PaymentRouter::new(handles.clone(), ledger.clone());
        (handles, ledger, router)
    }

    #[test_case("10" ; "integer")]
    #[test_case("0.5" ; "fraction")]
    #[test_case("1.1234567" ; "seven decimals")]
    #[test_case(" 25.00 " ; "padded")]
    fn test_valid_amounts(raw: &str) {
        assert_eq!(validate_amount(raw).unwrap(), raw.trim());
    }

    #[test_case("" ; "empty")]
    #[test_case("0" ; "zero")]
    #[test_case("0.0000000" ; "zero with decimals")]
    #[test_case("-1" ; "negative")]
    #[test_case("1.12345678" ; "eight decimals")]
    #[test_case("1." ; "trailing dot")]
    #[test_case(".5" ; "leading dot")]
    #[test_case("1e3" ; "exponent")]
    fn test_invalid_amounts(raw: &str) {
        assert!(matches!(
            validate_amount(raw),
            Err(MiniPayError::Validation(ValidationKind::Amount(_)))
        ));
    }

    #[tokio::test]
    async fn test_send_to_handle() {
        let (handles, ledger, router) = router();
        let sender = derive_keypair("sender").unwrap();
        let recipient = derive_keypair("recipient").unwrap().public_address();
        handles.register("alice", &recipient).unwrap();

        let receipt = router
            .send(&sender, "Alice@minipay", "5", Some("lunch"))
            .await
            .unwrap();

        assert_eq!(receipt.transaction_id, "tx-1");
        assert_eq!(receipt.payment.destination, recipient);
        assert_eq!(receipt.payment.memo.as_deref(), Some("lunch"));
        assert_eq!(ledger.submitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_to_raw_address() {
        let (_, _, router) = router();
        let sender = derive_keypair("sender").unwrap();
        let recipient = derive_keypair("recipient").unwrap().public_address();

        let receipt = router.send(&sender, &recipient, "1.5", None).await.unwrap();
        assert_eq!(receipt.payment.destination, recipient);
        assert_eq!(receipt.payment.asset_issuer, USDC_ISSUER);
    }

    #[tokio::test]
    async fn test_unknown_handle_is_not_found() {
        let (_, ledger, router) = router();
        let sender = derive_keypair("sender").unwrap();

        let err = router.send(&sender, "ghost", "1", None).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(ledger.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_long_memo_is_rejected() {
        let (_, _, router) = router();
        let sender = derive_keypair("sender").unwrap();
        let recipient = derive_keypair("recipient").unwrap().public_address();

        let memo = "x".repeat(29);
        assert!(matches!(
            router.send(&sender, &recipient, "1", Some(&memo)).await,
            Err(MiniPayError::Validation(ValidationKind::Memo(29)))
        ));
    }

    #[tokio::test]
    async fn test_balances_delegate_to_ledger() {
        let (_, _, router) = router();
        let address = derive_keypair("sender").unwrap().public_address();

        let balances = router.balances(&address).await.unwrap();
        assert_eq!(balances[0].asset_code, USDC_CODE);
        assert!(router.balances("nope").await.is_err());
    }

    #[test]
    fn test_payment_uri_round_trip() {
        let destination = derive_keypair("recipient").unwrap().public_address();
        let request = PaymentUri::usdc(&destination, "10", Some("coffee & cake")).unwrap();

        let uri = request.to_uri().unwrap();
        assert!(uri.starts_with("web+stellar:pay?destination="));
        assert!(uri.contains("memo_type=MEMO_TEXT"));

        assert_eq!(PaymentUri::parse(&uri).unwrap(), request);
    }

    #[test_case(Environment::Staging, true ; "test network carries passphrase")]
    #[test_case(Environment::Production, false ; "public network omits passphrase")]
    fn test_payment_uri_network(environment: Environment, has_passphrase: bool) {
        let destination = derive_keypair("recipient").unwrap().public_address();
        let request = PaymentUri::usdc(&destination, "1.5", None)
            .unwrap()
            .on_network(environment);

        let uri = request.to_uri().unwrap();
        assert_eq!(uri.contains("network_passphrase="), has_passphrase);

        let parsed = PaymentUri::parse(&uri).unwrap();
        assert_eq!(parsed.environment(), Some(environment));
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_unknown_network_passphrase() {
        let parsed = PaymentUri::parse(
            "web+stellar:pay?destination=GABC&amount=3&network_passphrase=Futurenet",
        )
        .unwrap();
        assert_eq!(parsed.environment(), None);
    }

    #[test]
    fn test_payment_uri_defaults_and_errors() {
        let parsed = PaymentUri::parse("web+stellar:pay?destination=GABC&amount=3").unwrap();
        assert_eq!(parsed.asset_code, USDC_CODE);
        assert_eq!(parsed.memo, None);
        assert_eq!(parsed.asset_issuer, None);

        for uri in [
            "web+stellar:tx?xdr=AAAA",
            "https://example.com/pay?destination=G&amount=1",
            "web+stellar:pay?amount=1",
            "web+stellar:pay?destination=GABC",
            "not a uri",
        ] {
            assert!(
                matches!(
                    PaymentUri::parse(uri),
                    Err(MiniPayError::Validation(ValidationKind::PaymentUri(_)))
                ),
                "{uri}"
            );
        }
    }
}
