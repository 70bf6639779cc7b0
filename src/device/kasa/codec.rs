use crate::device::error::DeviceError;

/// Kasa's "Linkie" framing: a big-endian length prefix followed by an
/// XOR-autokey stream seeded with 171.
pub(crate) const HEADER_LEN: usize = 4;
pub(crate) const MAX_BODY_BYTES: usize = 8192;

const INITIAL_PAD: u8 = 171;

pub(crate) fn scramble(body: &[u8]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(HEADER_LEN + body.len());
    buffer.extend_from_slice(&(body.len() as u32).to_be_bytes());
    let mut pad = INITIAL_PAD;
    for &byte in body {
        pad ^= byte;
        buffer.push(pad);
    }
    buffer
}

/// Body length declared by the frame header, if enough bytes have arrived.
pub(crate) fn declared_body_len(frame: &[u8]) -> Option<usize> {
    let header = frame.get(..HEADER_LEN)?;
    let mut bytes = [0u8; HEADER_LEN];
    bytes.copy_from_slice(header);
    Some(u32::from_be_bytes(bytes) as usize)
}

pub(crate) fn unscramble(frame: &[u8]) -> Result<Vec<u8>, DeviceError> {
    let declared = declared_body_len(frame).ok_or(DeviceError::ShortResponse(frame.len()))?;
    let body = &frame[HEADER_LEN..];
    if declared != body.len() {
        return Err(DeviceError::FrameLengthMismatch {
            declared,
            actual: body.len(),
        });
    }
    let mut buffer = Vec::with_capacity(body.len());
    let mut pad = INITIAL_PAD;
    for &byte in body {
        buffer.push(pad ^ byte);
        pad = byte;
    }
    Ok(buffer)
}
