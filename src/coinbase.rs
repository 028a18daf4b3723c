use super::*;

/// Consensus limit on the coinbase input script.
const MAX_COINBASE_SCRIPT_SIZE: usize = 100;

/// Builds the two halves of the generation transaction. The full serialized
/// transaction is `prefix ‖ extranonce1 ‖ extranonce2 ‖ suffix`; the
/// extranonce bytes sit inside the input script as a single data push whose
/// length byte closes the prefix.
pub struct CoinbaseBuilder {
    pub height: u64,
    pub value: u64,
    pub flags: Vec<u8>,
    pub pool_script: Vec<u8>,
    pub signature: String,
    pub recipients: Vec<Recipient>,
    pub witness_commitment: Option<Vec<u8>>,
    pub extranonce_size: usize,
    pub tx_version: i32,
}

pub struct Recipient {
    pub script: Vec<u8>,
    pub percent: f64,
}

impl CoinbaseBuilder {
    pub fn build(self) -> Result<(Vec<u8>, Vec<u8>)> {
        ensure!(
            self.extranonce_size <= 0x4b,
            "extranonce placeholder too large for a single push"
        );

        let mut script_prefix = serialize_script_number(self.height.try_into()?);
        script_prefix.extend_from_slice(&self.flags);
        script_prefix.push(self.extranonce_size as u8);

        let script_suffix = util::var_string(&self.signature);

        let script_length = script_prefix.len() + self.extranonce_size + script_suffix.len();
        ensure!(
            script_length <= MAX_COINBASE_SCRIPT_SIZE,
            "coinbase script is {script_length} bytes, the consensus limit is {MAX_COINBASE_SCRIPT_SIZE}"
        );

        let mut prefix = Vec::new();
        prefix.extend_from_slice(&util::pack_u32_le(self.tx_version as u32));
        prefix.extend_from_slice(&util::var_int(1));
        prefix.extend_from_slice(&[0u8; 32]);
        prefix.extend_from_slice(&util::pack_u32_le(0xffff_ffff));
        prefix.extend_from_slice(&util::var_int(script_length as u64));
        prefix.extend_from_slice(&script_prefix);

        let mut suffix = script_suffix;
        suffix.extend_from_slice(&util::pack_u32_le(0xffff_ffff));
        suffix.extend_from_slice(&self.serialize_outputs()?);
        suffix.extend_from_slice(&util::pack_u32_le(0));

        Ok((prefix, suffix))
    }

    fn serialize_outputs(&self) -> Result<Vec<u8>> {
        let mut outputs = Vec::new();
        let mut count = 0u64;

        let mut recipient_total = 0u64;
        let mut recipient_outputs = Vec::new();

        for recipient in &self.recipients {
            ensure!(
                (0.0..=100.0).contains(&recipient.percent),
                "recipient percentage {} out of range",
                recipient.percent
            );

            let value = (self.value as f64 * recipient.percent / 100.0).floor() as u64;
            recipient_total = recipient_total
                .checked_add(value)
                .context("recipient outputs overflow the reward")?;
            recipient_outputs.push((value, recipient.script.as_slice()));
        }

        let pool_value = self
            .value
            .checked_sub(recipient_total)
            .context("recipient outputs exceed the reward")?;

        serialize_output(&mut outputs, pool_value, &self.pool_script);
        count += 1;

        if let Some(commitment) = &self.witness_commitment {
            serialize_output(&mut outputs, 0, commitment);
            count += 1;
        }

        for (value, script) in recipient_outputs {
            serialize_output(&mut outputs, value, script);
            count += 1;
        }

        let mut serialized = util::var_int(count);
        serialized.extend_from_slice(&outputs);
        Ok(serialized)
    }
}

fn serialize_output(buf: &mut Vec<u8>, value: u64, script: &[u8]) {
    buf.extend_from_slice(&util::pack_i64_le(value as i64));
    buf.extend_from_slice(&util::var_int(script.len() as u64));
    buf.extend_from_slice(script);
}

/// Minimal script-number push, as BIP34 requires for the height.
fn serialize_script_number(n: i64) -> Vec<u8> {
    if (1..=16).contains(&n) {
        return vec![0x50 + n as u8];
    }

    let mut bytes = [0u8; 8];
    let len = bitcoin::script::write_scriptint(&mut bytes, n);

    let mut out = Vec::with_capacity(len + 1);
    out.push(len as u8);
    out.extend_from_slice(&bytes[..len]);
    out
}
