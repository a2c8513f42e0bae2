use std::collections::BTreeMap;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use common::OrderId;
use domain::Money;

use super::{
    CallbackOutcome, CallbackParams, GatewayError, PaymentGateway, RedirectRequest, RedirectUrl,
    SECURE_HASH, Signer, canonicalize,
};

/// Merchant settings for VNPAY.
#[derive(Clone)]
pub struct VnPayConfig {
    pub tmn_code: String,
    pub hash_secret: String,
    pub payment_url: String,
    pub return_url: String,
    pub version: String,
    pub locale: String,
    pub order_type: String,
    /// Offset of the gateway's local time from UTC.
    pub utc_offset_secs: i32,
    /// How long the buyer has to complete the payment.
    pub payment_ttl: Duration,
}

impl VnPayConfig {
    pub const SANDBOX_URL: &'static str = "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html";

    /// Creates a config with the gateway's defaults (v2.1.0, Vietnamese
    /// locale, GMT+7, 15 minute expiry).
    pub fn new(
        tmn_code: impl Into<String>,
        hash_secret: impl Into<String>,
        return_url: impl Into<String>,
    ) -> Self {
        Self {
            tmn_code: tmn_code.into(),
            hash_secret: hash_secret.into(),
            payment_url: Self::SANDBOX_URL.to_string(),
            return_url: return_url.into(),
            version: "2.1.0".to_string(),
            locale: "vn".to_string(),
            order_type: "other".to_string(),
            utc_offset_secs: 7 * 3600,
            payment_ttl: Duration::minutes(15),
        }
    }

    pub fn with_payment_url(mut self, url: impl Into<String>) -> Self {
        self.payment_url = url.into();
        self
    }

    pub fn with_payment_ttl(mut self, ttl: Duration) -> Self {
        self.payment_ttl = ttl;
        self
    }
}

impl std::fmt::Debug for VnPayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VnPayConfig")
            .field("tmn_code", &self.tmn_code)
            .field("hash_secret", &"<redacted>")
            .field("payment_url", &self.payment_url)
            .field("return_url", &self.return_url)
            .field("version", &self.version)
            .field("locale", &self.locale)
            .field("order_type", &self.order_type)
            .field("utc_offset_secs", &self.utc_offset_secs)
            .field("payment_ttl", &self.payment_ttl)
            .finish()
    }
}

/// VNPAY redirect and return-URL verification.
#[derive(Debug, Clone)]
pub struct VnPayGateway {
    config: VnPayConfig,
    signer: Signer,
    offset: FixedOffset,
}

impl VnPayGateway {
    pub fn new(config: VnPayConfig) -> Result<Self, GatewayError> {
        if config.tmn_code.is_empty() {
            return Err(GatewayError::Config("merchant code is empty".into()));
        }
        let signer = Signer::new(config.hash_secret.as_bytes())?;
        let offset = FixedOffset::east_opt(config.utc_offset_secs).ok_or_else(|| {
            GatewayError::Config(format!("invalid UTC offset: {}", config.utc_offset_secs))
        })?;

        Ok(Self {
            config,
            signer,
            offset,
        })
    }

    pub fn config(&self) -> &VnPayConfig {
        &self.config
    }

    /// Formats a timestamp as `YYYYMMDDHHmmss` in the gateway's timezone.
    pub fn timestamp(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.offset)
            .format("%Y%m%d%H%M%S")
            .to_string()
    }

    /// The unsigned parameter set of a redirect.
    pub fn redirect_params(
        &self,
        request: &RedirectRequest,
    ) -> Result<BTreeMap<&'static str, String>, GatewayError> {
        let amount = request
            .amount
            .to_gateway_units()
            .filter(|units| *units > 0)
            .ok_or(GatewayError::InvalidAmount(request.amount))?;
        let expires_at = request.created_at + self.config.payment_ttl;

        Ok(BTreeMap::from([
            ("vnp_Version", self.config.version.clone()),
            ("vnp_Command", "pay".to_string()),
            ("vnp_TmnCode", self.config.tmn_code.clone()),
            ("vnp_Locale", self.config.locale.clone()),
            ("vnp_CurrCode", "VND".to_string()),
            ("vnp_TxnRef", request.transaction_ref.clone()),
            ("vnp_OrderInfo", request.order_id.to_string()),
            ("vnp_OrderType", self.config.order_type.clone()),
            ("vnp_Amount", amount.to_string()),
            ("vnp_ReturnUrl", self.config.return_url.clone()),
            ("vnp_IpAddr", request.client_ip.clone()),
            ("vnp_CreateDate", self.timestamp(request.created_at)),
            ("vnp_ExpireDate", self.timestamp(expires_at)),
        ]))
    }
}

impl PaymentGateway for VnPayGateway {
    fn name(&self) -> &'static str {
        "vnpay"
    }

    fn build_redirect(&self, request: &RedirectRequest) -> Result<RedirectUrl, GatewayError> {
        let params = self.redirect_params(request)?;
        let canonical = canonicalize(&params);
        let signature = self.signer.sign(&canonical);

        Ok(RedirectUrl::new(format!(
            "{}?{}&{}={}",
            self.config.payment_url, canonical, SECURE_HASH, signature
        )))
    }

    fn verify_callback(&self, params: &CallbackParams) -> Result<CallbackOutcome, GatewayError> {
        let signature = params.require(SECURE_HASH)?;
        let canonical = canonicalize(params.iter());
        if !self.signer.verify(&canonical, signature) {
            return Err(GatewayError::InvalidSignature);
        }

        let order_id: OrderId = params
            .require("vnp_OrderInfo")?
            .parse()
            .map_err(|e: common::ParseIdError| GatewayError::MalformedCallback(e.to_string()))?;
        let units: i64 = params.require("vnp_Amount")?.parse().map_err(|_| {
            GatewayError::MalformedCallback("vnp_Amount is not an integer".into())
        })?;
        let amount = Money::from_gateway_units(units).ok_or_else(|| {
            GatewayError::MalformedCallback(format!("vnp_Amount {units} has a fractional part"))
        })?;

        Ok(CallbackOutcome {
            order_id,
            transaction_ref: params.require("vnp_TxnRef")?.to_string(),
            response_code: params.require("vnp_ResponseCode")?.to_string(),
            gateway_transaction_no: params
                .get("vnp_TransactionNo")
                .filter(|no| !no.is_empty())
                .map(str::to_string),
            amount,
        })
    }
}
