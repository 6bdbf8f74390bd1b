//! Conversion between the domain model and both wire encodings.
//!
//! Nothing outside this module knows which JSON field holds the amount in
//! which version, or how a network is spelled on the wire. Callers pick a
//! [`ProtocolVersion`] and hand over domain values.

use std::sync::Arc;

use super::{FacilitatorRequest, ProtocolVersion, v1, v2};
use crate::amount::TokenAmount;
use crate::encoding::{Base64JsonError, from_base64_json, to_base64_json};
use crate::error::ErrorReason;
use crate::networks::NetworkRegistry;
use crate::types::{
    ExactPayload, PaymentPayload, PaymentRequired, PaymentRequirement, RequirementExtra,
    ResourceInfo, SettlementResult, UnknownScheme,
};

/// Failure to read or write a wire message.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// A header value is not base64.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// A message is not the expected JSON.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    /// `x402Version` is neither 1 nor 2.
    #[error("unsupported x402 version {0}")]
    Version(u8),
    /// The scheme name is not implemented.
    #[error(transparent)]
    Scheme(#[from] UnknownScheme),
    /// An amount field is not an unsigned integer.
    #[error("invalid amount {0:?}")]
    Amount(String),
    /// A version 2 payment must echo the requirement it pays for.
    #[error("version 2 payment has no accepted requirement")]
    MissingAccepted,
}

impl From<Base64JsonError> for AdapterError {
    fn from(value: Base64JsonError) -> Self {
        match value {
            Base64JsonError::Base64(e) => Self::Base64(e),
            Base64JsonError::Json(e) => Self::Json(e),
        }
    }
}

impl AdapterError {
    /// Taxonomy code for a message that failed to decode.
    #[must_use]
    pub const fn reason(&self) -> ErrorReason {
        match self {
            Self::Version(_) => ErrorReason::InvalidX402Version,
            Self::Scheme(_) => ErrorReason::UnsupportedScheme,
            Self::Base64(_) | Self::Json(_) | Self::Amount(_) | Self::MissingAccepted => {
                ErrorReason::InvalidPayload
            }
        }
    }
}

/// Where an encoded 402 demand goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentRequiredWire {
    /// Version 1: the JSON response body.
    Body(String),
    /// Version 2: a response header, with no body.
    Header { name: &'static str, value: String },
}

/// Encoder and decoder for both protocol versions.
#[derive(Debug, Clone)]
pub struct ProtocolAdapter {
    networks: Arc<NetworkRegistry>,
}

impl ProtocolAdapter {
    /// A codec translating network names through `networks`.
    #[must_use]
    pub const fn new(networks: Arc<NetworkRegistry>) -> Self {
        Self { networks }
    }

    /// The registry network names are translated through.
    #[must_use]
    pub const fn networks(&self) -> &Arc<NetworkRegistry> {
        &self.networks
    }

    /// Spells `network` the way `version` expects it.
    #[must_use]
    pub fn network_for(&self, version: ProtocolVersion, network: &str) -> String {
        match version {
            ProtocolVersion::V1 => self.networks.v1_name(network),
            ProtocolVersion::V2 => self.networks.caip2(network),
        }
    }

    /// A requirement in version 1 shape. Empty resource fields fall back to `resource`.
    #[must_use]
    pub fn requirement_to_v1(
        &self,
        requirement: &PaymentRequirement,
        resource: Option<&ResourceInfo>,
    ) -> v1::PaymentRequirements {
        v1::PaymentRequirements {
            scheme: requirement.scheme.as_str().to_owned(),
            network: self.network_for(ProtocolVersion::V1, &requirement.network),
            max_amount_required: requirement.amount.to_string(),
            resource: requirement
                .resource
                .clone()
                .or_else(|| resource.map(|r| r.url.clone()))
                .unwrap_or_default(),
            description: requirement
                .description
                .clone()
                .or_else(|| resource.map(|r| r.description.clone()))
                .unwrap_or_default(),
            mime_type: requirement
                .mime_type
                .clone()
                .or_else(|| resource.map(|r| r.mime_type.clone()))
                .unwrap_or_default(),
            output_schema: requirement.output_schema.clone(),
            pay_to: requirement.pay_to.clone(),
            max_timeout_seconds: requirement.max_timeout_seconds,
            asset: requirement.asset.clone(),
            extra: extra_to_json(requirement.extra.as_ref()),
        }
    }

    /// A requirement in version 2 shape, network as CAIP-2.
    #[must_use]
    pub fn requirement_to_v2(&self, requirement: &PaymentRequirement) -> v2::PaymentRequirements {
        v2::PaymentRequirements {
            scheme: requirement.scheme.as_str().to_owned(),
            network: self.network_for(ProtocolVersion::V2, &requirement.network),
            amount: requirement.amount.to_string(),
            asset: requirement.asset.clone(),
            pay_to: requirement.pay_to.clone(),
            max_timeout_seconds: requirement.max_timeout_seconds,
            extra: extra_to_json(requirement.extra.as_ref()),
        }
    }

    /// # Errors
    ///
    /// Unknown scheme or a non-integer amount.
    pub fn requirement_from_v1(
        &self,
        wire: &v1::PaymentRequirements,
    ) -> Result<PaymentRequirement, AdapterError> {
        Ok(PaymentRequirement {
            scheme: wire.scheme.parse()?,
            network: wire.network.clone(),
            asset: wire.asset.clone(),
            pay_to: wire.pay_to.clone(),
            amount: parse_amount(&wire.max_amount_required)?,
            max_timeout_seconds: wire.max_timeout_seconds,
            extra: extra_from_json(wire.extra.as_ref()),
            resource: non_empty(&wire.resource),
            description: non_empty(&wire.description),
            mime_type: non_empty(&wire.mime_type),
            output_schema: wire.output_schema.clone(),
            discoverable: false,
        })
    }

    /// # Errors
    ///
    /// Unknown scheme or a non-integer amount.
    pub fn requirement_from_v2(
        &self,
        wire: &v2::PaymentRequirements,
        resource: Option<&ResourceInfo>,
    ) -> Result<PaymentRequirement, AdapterError> {
        Ok(PaymentRequirement {
            scheme: wire.scheme.parse()?,
            network: wire.network.clone(),
            asset: wire.asset.clone(),
            pay_to: wire.pay_to.clone(),
            amount: parse_amount(&wire.amount)?,
            max_timeout_seconds: wire.max_timeout_seconds,
            extra: extra_from_json(wire.extra.as_ref()),
            resource: resource.map(|r| r.url.clone()),
            description: resource.and_then(|r| non_empty(&r.description)),
            mime_type: resource.and_then(|r| non_empty(&r.mime_type)),
            output_schema: None,
            discoverable: false,
        })
    }

    /// Encodes a 402 demand for its version.
    ///
    /// # Errors
    ///
    /// Serialization failure.
    pub fn encode_payment_required(
        &self,
        required: &PaymentRequired,
    ) -> Result<PaymentRequiredWire, AdapterError> {
        match required.version {
            ProtocolVersion::V1 => {
                let wire = v1::PaymentRequired {
                    x402_version: v1::V1,
                    accepts: required
                        .accepts
                        .iter()
                        .map(|r| self.requirement_to_v1(r, required.resource.as_ref()))
                        .collect(),
                    error: required.error.clone(),
                };
                Ok(PaymentRequiredWire::Body(serde_json::to_string(&wire)?))
            }
            ProtocolVersion::V2 => {
                let wire = v2::PaymentRequired {
                    x402_version: v2::V2,
                    resource: required.resource.clone(),
                    accepts: required
                        .accepts
                        .iter()
                        .map(|r| self.requirement_to_v2(r))
                        .collect(),
                    error: required.error.clone(),
                };
                Ok(PaymentRequiredWire::Header {
                    name: ProtocolVersion::V2.payment_required_header().unwrap_or("PAYMENT-REQUIRED"),
                    value: to_base64_json(&wire)?,
                })
            }
        }
    }

    /// Reads a version 1 402 body.
    ///
    /// # Errors
    ///
    /// The body is not a version 1 demand, or a requirement is malformed.
    pub fn decode_payment_required_body(&self, body: &[u8]) -> Result<PaymentRequired, AdapterError> {
        let wire: v1::PaymentRequired = serde_json::from_slice(body)?;
        let accepts = wire
            .accepts
            .iter()
            .map(|r| self.requirement_from_v1(r))
            .collect::<Result<Vec<_>, _>>()?;
        let resource = wire
            .accepts
            .iter()
            .find(|r| !r.resource.is_empty())
            .map(|r| ResourceInfo {
                url: r.resource.clone(),
                description: r.description.clone(),
                mime_type: r.mime_type.clone(),
            });
        Ok(PaymentRequired {
            version: ProtocolVersion::V1,
            resource,
            accepts,
            error: wire.error,
        })
    }

    /// Reads a version 2 `PAYMENT-REQUIRED` header value.
    ///
    /// # Errors
    ///
    /// Bad base64, bad JSON, or a malformed requirement.
    pub fn decode_payment_required_header(&self, value: &str) -> Result<PaymentRequired, AdapterError> {
        let wire: v2::PaymentRequired = from_base64_json(value)?;
        let accepts = wire
            .accepts
            .iter()
            .map(|r| self.requirement_from_v2(r, wire.resource.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PaymentRequired {
            version: ProtocolVersion::V2,
            resource: wire.resource,
            accepts,
            error: wire.error,
        })
    }

    /// Encodes the payment header value: base64(JSON) in the payload's version.
    ///
    /// # Errors
    ///
    /// A version 2 payload without `accepted`, or serialization failure.
    pub fn encode_payment(&self, payment: &PaymentPayload) -> Result<String, AdapterError> {
        match payment.version {
            ProtocolVersion::V1 => Ok(to_base64_json(&self.payment_to_v1(payment))?),
            ProtocolVersion::V2 => Ok(to_base64_json(&self.payment_to_v2(payment)?)?),
        }
    }

    /// Decodes a payment header value sent under `version`'s header name.
    ///
    /// # Errors
    ///
    /// Bad base64, bad JSON, a version field that contradicts the header, or
    /// an unknown scheme.
    pub fn decode_payment(
        &self,
        version: ProtocolVersion,
        value: &str,
    ) -> Result<PaymentPayload, AdapterError> {
        match version {
            ProtocolVersion::V1 => self.payment_from_v1(from_base64_json(value)?),
            ProtocolVersion::V2 => self.payment_from_v2(from_base64_json(value)?),
        }
    }

    /// Encodes the settlement summary header value.
    ///
    /// # Errors
    ///
    /// Serialization failure.
    pub fn encode_settlement(
        &self,
        version: ProtocolVersion,
        settlement: &SettlementResult,
    ) -> Result<String, AdapterError> {
        let mut wire = settlement.clone();
        wire.network = self.network_for(version, &settlement.network);
        Ok(to_base64_json(&wire)?)
    }

    /// # Errors
    ///
    /// Bad base64 or JSON.
    pub fn decode_settlement(&self, value: &str) -> Result<SettlementResult, AdapterError> {
        Ok(from_base64_json(value)?)
    }

    /// Wraps a payment and the requirement it is checked against for the
    /// facilitator API, in the payment's version.
    ///
    /// # Errors
    ///
    /// A version 2 payload without `accepted`, or serialization failure.
    pub fn encode_facilitator_request(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<FacilitatorRequest, AdapterError> {
        let (payment_payload, payment_requirements) = match payment.version {
            ProtocolVersion::V1 => (
                serde_json::to_value(self.payment_to_v1(payment))?,
                serde_json::to_value(self.requirement_to_v1(requirement, None))?,
            ),
            ProtocolVersion::V2 => (
                serde_json::to_value(self.payment_to_v2(payment)?)?,
                serde_json::to_value(self.requirement_to_v2(requirement))?,
            ),
        };
        Ok(FacilitatorRequest {
            x402_version: payment.version.as_u8(),
            payment_payload,
            payment_requirements,
        })
    }

    /// Reads a facilitator API body into domain values.
    ///
    /// # Errors
    ///
    /// Unknown `x402Version`, or nested documents that do not match it.
    pub fn decode_facilitator_request(
        &self,
        request: &FacilitatorRequest,
    ) -> Result<(PaymentPayload, PaymentRequirement), AdapterError> {
        let version = ProtocolVersion::from_u8(request.x402_version)
            .ok_or(AdapterError::Version(request.x402_version))?;
        match version {
            ProtocolVersion::V1 => {
                let payment: v1::PaymentPayload =
                    serde_json::from_value(request.payment_payload.clone())?;
                let requirement: v1::PaymentRequirements =
                    serde_json::from_value(request.payment_requirements.clone())?;
                Ok((
                    self.payment_from_v1(payment)?,
                    self.requirement_from_v1(&requirement)?,
                ))
            }
            ProtocolVersion::V2 => {
                let payment: v2::PaymentPayload =
                    serde_json::from_value(request.payment_payload.clone())?;
                let requirement: v2::PaymentRequirements =
                    serde_json::from_value(request.payment_requirements.clone())?;
                let requirement = self.requirement_from_v2(&requirement, payment.resource.as_ref())?;
                Ok((self.payment_from_v2(payment)?, requirement))
            }
        }
    }

    fn payment_to_v1(&self, payment: &PaymentPayload) -> v1::PaymentPayload {
        v1::PaymentPayload {
            x402_version: v1::V1,
            scheme: payment.scheme.as_str().to_owned(),
            network: self.network_for(ProtocolVersion::V1, &payment.network),
            payload: v1::ExactPayload {
                signature: payment.payload.signature.clone(),
                authorization: payment.payload.authorization.clone(),
                resource: payment.resource.clone(),
            },
        }
    }

    fn payment_to_v2(&self, payment: &PaymentPayload) -> Result<v2::PaymentPayload, AdapterError> {
        let accepted = payment.accepted.as_ref().ok_or(AdapterError::MissingAccepted)?;
        Ok(v2::PaymentPayload {
            x402_version: v2::V2,
            accepted: self.requirement_to_v2(accepted),
            payload: payment.payload.clone(),
            resource: payment.resource.as_ref().map(|url| ResourceInfo {
                url: url.clone(),
                description: accepted.description.clone().unwrap_or_default(),
                mime_type: accepted.mime_type.clone().unwrap_or_default(),
            }),
        })
    }

    fn payment_from_v1(&self, wire: v1::PaymentPayload) -> Result<PaymentPayload, AdapterError> {
        Ok(PaymentPayload {
            version: ProtocolVersion::V1,
            scheme: wire.scheme.parse()?,
            network: wire.network,
            accepted: None,
            payload: ExactPayload {
                signature: wire.payload.signature,
                authorization: wire.payload.authorization,
            },
            resource: wire.payload.resource,
        })
    }

    fn payment_from_v2(&self, wire: v2::PaymentPayload) -> Result<PaymentPayload, AdapterError> {
        let accepted = self.requirement_from_v2(&wire.accepted, wire.resource.as_ref())?;
        Ok(PaymentPayload {
            version: ProtocolVersion::V2,
            scheme: accepted.scheme,
            network: accepted.network.clone(),
            accepted: Some(accepted),
            payload: wire.payload,
            resource: wire.resource.map(|r| r.url),
        })
    }
}

fn parse_amount(value: &str) -> Result<TokenAmount, AdapterError> {
    value
        .parse()
        .map_err(|_| AdapterError::Amount(value.to_owned()))
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_owned())
    }
}

fn extra_to_json(extra: Option<&RequirementExtra>) -> Option<serde_json::Value> {
    extra.and_then(|e| serde_json::to_value(e).ok())
}

fn extra_from_json(extra: Option<&serde_json::Value>) -> Option<RequirementExtra> {
    extra
        .and_then(|v| serde_json::from_value::<RequirementExtra>(v.clone()).ok())
        .and_then(PaymentRequirement::extra_or_none)
}
