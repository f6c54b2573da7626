//! Air-gapped pin handshake: the device shows a `jade-pin` QR carrying an
//! `http_request`, the host relays it to the pin server and answers with a
//! QR of its own.

use super::gate::{DeviceHttpRequest, DeviceRequestGate};
use crate::channel::BcurCodec;
use crate::protocol::{BcurDecodedData, BcurEncodeParams, BcurEncodedData};
use crate::{ResolverError, Result};
use minicbor::encode::{self, Write};
use minicbor::Encoder;
use serde_json::{Map, Value};
use std::sync::Arc;

pub const JADE_PIN_UR_TYPE: &str = "jade-pin";
pub const QR_AUTH_ID: &str = "qrauth";

pub struct QrHandshake {
    gate: Arc<DeviceRequestGate>,
    codec: Arc<dyn BcurCodec>,
}

impl QrHandshake {
    pub fn new(gate: Arc<DeviceRequestGate>, codec: Arc<dyn BcurCodec>) -> Self {
        Self { gate, codec }
    }

    /// Answer a scanned `jade-pin` payload with the QR parts to show the device.
    pub async fn respond(&self, scanned: &BcurDecodedData) -> Result<BcurEncodedData> {
        if scanned.ur_type() != Some(JADE_PIN_UR_TYPE) {
            return Err(ResolverError::protocol(format!(
                "expected {} payload, got {:?}",
                JADE_PIN_UR_TYPE,
                scanned.ur_type()
            )));
        }
        let message = scanned
            .result()
            .ok_or_else(|| ResolverError::protocol("jade-pin payload without result"))?;
        if message.get("id").and_then(Value::as_str) != Some(QR_AUTH_ID) {
            return Err(ResolverError::protocol("jade-pin payload is not a qrauth message"));
        }

        let request = DeviceHttpRequest::from_device_result(&Value::Object(message.clone()))?
            .ok_or_else(|| ResolverError::protocol("qrauth message without http_request"))?;
        let body = self.gate.forward(&request).await?;
        let package = request.reply_package(QR_AUTH_ID, body);

        let cbor = json_to_cbor(&package)?;
        log::debug!("Encoding {} byte qrauth reply", cbor.len());
        self.codec
            .bcur_encode(&BcurEncodeParams::new(JADE_PIN_UR_TYPE, hex::encode(cbor)))
            .await
    }
}

/// CBOR encoding of a JSON value.
pub fn json_to_cbor(value: &Value) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let mut encoder = Encoder::new(&mut buffer);
        encode_value(&mut encoder, value)
            .map_err(|e| ResolverError::protocol(format!("CBOR encoding failed: {}", e)))?;
    }
    Ok(buffer)
}

fn encode_value<W: Write>(e: &mut Encoder<W>, value: &Value) -> std::result::Result<(), encode::Error<W::Error>> {
    match value {
        Value::Null => {
            e.null()?;
        }
        Value::Bool(b) => {
            e.bool(*b)?;
        }
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                e.u64(u)?;
            } else if let Some(i) = n.as_i64() {
                e.i64(i)?;
            } else if let Some(f) = n.as_f64() {
                e.f64(f)?;
            }
        }
        Value::String(s) => {
            e.str(s)?;
        }
        Value::Array(items) => {
            e.array(items.len() as u64)?;
            for item in items {
                encode_value(e, item)?;
            }
        }
        Value::Object(map) => encode_map(e, map)?,
    }
    Ok(())
}

fn encode_map<W: Write>(
    e: &mut Encoder<W>,
    map: &Map<String, Value>,
) -> std::result::Result<(), encode::Error<W::Error>> {
    e.map(map.len() as u64)?;
    for (key, value) in map {
        e.str(key)?;
        encode_value(e, value)?;
    }
    Ok(())
}
