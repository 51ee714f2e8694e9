// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! C3: HDLC-lite byte framing.
//!
//! Frames are delimited by `0x7e`, with `0x7e` and the escape byte `0x7d`
//! itself escaped in the payload as `0x7d` followed by the byte XORed with
//! `0x20`, and terminated by a two-byte FCS (CRC-16/X.25, matching the
//! `crc` crate's `CRC_16_IBM_SDLC` constant) computed over the unescaped
//! payload. This is the framing spinel-over-UART uses underneath the typed
//! command layer in [`crate::spinel`].

use crc::{Crc, CRC_16_IBM_SDLC};
use ringbuf::{ringbuf, ringbuf_entry};

use crate::error::Error;

const FCS: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

pub const FLAG: u8 = 0x7e;
const ESCAPE: u8 = 0x7d;
const ESCAPE_XOR: u8 = 0x20;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Trace {
    FrameDecoded(usize),
    Escape,
    BadFcs,
    Overrun,
    EmptyFrame,
}

ringbuf!(HDLC_TRACE, Trace, 16, Trace::FrameDecoded(0));

fn trace(t: Trace) {
    ringbuf_entry!(HDLC_TRACE, t);
}

/// Appends the framed (escaped, FCS-terminated, flag-delimited) encoding of
/// `payload` to `out` one byte at a time. `out` returning `Err` aborts the
/// encode and propagates the error (used when `out` is backed by a bounded
/// buffer that can run out of room).
pub fn encode(payload: &[u8], mut out: impl FnMut(u8) -> Result<(), Error>) -> Result<(), Error> {
    let mut digest = FCS.digest();
    digest.update(payload);
    let fcs = digest.finalize().to_le_bytes();

    out(FLAG)?;
    for &byte in payload.iter().chain(fcs.iter()) {
        if byte == FLAG || byte == ESCAPE {
            out(ESCAPE)?;
            out(byte ^ ESCAPE_XOR)?;
        } else {
            out(byte)?;
        }
    }
    out(FLAG)?;
    Ok(())
}

/// Incremental decoder: feed it bytes as they arrive off the wire and it
/// reports a complete, FCS-validated frame whenever one closes.
pub struct Decoder<const N: usize> {
    buf: heapless::Vec<u8, N>,
    escaping: bool,
    overrun: bool,
}

impl<const N: usize> Decoder<N> {
    pub fn new() -> Self {
        Self {
            buf: heapless::Vec::new(),
            escaping: false,
            overrun: false,
        }
    }

    /// Feeds one byte into the decoder. Returns `Some(Ok(frame))` once a
    /// flag byte closes a well-formed frame (and clears internal state for
    /// the next one), `Some(Err(_))` when a flag closes a malformed or
    /// overrun frame, and `None` while a frame is still being accumulated.
    ///
    /// An empty frame (two consecutive flag bytes, used as inter-frame
    /// padding on some links) is silently absorbed and reported as `None`.
    pub fn push(&mut self, byte: u8) -> Option<Result<&[u8], Error>> {
        if byte == FLAG {
            if self.buf.is_empty() && !self.overrun {
                trace(Trace::EmptyFrame);
                return None;
            }
            let overrun = core::mem::replace(&mut self.overrun, false);
            self.escaping = false;
            if overrun {
                self.buf.clear();
                trace(Trace::Overrun);
                return Some(Err(Error::Parse));
            }
            if self.buf.len() < 2 {
                self.buf.clear();
                return Some(Err(Error::Parse));
            }
            let split = self.buf.len() - 2;
            let mut digest = FCS.digest();
            digest.update(&self.buf[..split]);
            let expected = digest.finalize().to_le_bytes();
            if self.buf[split..] != expected {
                self.buf.clear();
                trace(Trace::BadFcs);
                return Some(Err(Error::Parse));
            }
            self.buf.truncate(split);
            trace(Trace::FrameDecoded(split));
            return Some(Ok(&self.buf));
        }

        if self.overrun {
            return None;
        }

        if self.escaping {
            self.escaping = false;
            if self.buf.push(byte ^ ESCAPE_XOR).is_err() {
                self.overrun = true;
            }
        } else if byte == ESCAPE {
            self.escaping = true;
            trace(Trace::Escape);
        } else if self.buf.push(byte).is_err() {
            self.overrun = true;
        }
        None
    }

    /// True so long as no partial frame is being accumulated. Used by the
    /// supervisor's host-sleep entry to confirm the link can be quiesced
    /// without losing a frame mid-decode.
    pub fn is_idle(&self) -> bool {
        self.buf.is_empty() && !self.escaping
    }

    /// Discards any partially-accumulated frame. Used by the supervisor when
    /// entering reset recovery, so that bytes straddling a reset boundary
    /// don't get stitched into a bogus frame.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.escaping = false;
        self.overrun = false;
    }
}

impl<const N: usize> Default for Decoder<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_to_vec(payload: &[u8]) -> heapless::Vec<u8, 64> {
        let mut out = heapless::Vec::new();
        encode(payload, |b| out.push(b).map_err(|_| Error::NoBuffers)).unwrap();
        out
    }

    #[test]
    fn roundtrip_plain_payload() {
        let payload = [0x01, 0x02, 0x03, 0x04];
        let framed = encode_to_vec(&payload);
        let mut dec: Decoder<64> = Decoder::new();
        let mut result = None;
        for &b in &framed {
            if let Some(r) = dec.push(b) {
                result = Some(r.map(|f| f.to_vec()));
            }
        }
        assert_eq!(result.unwrap().unwrap(), payload);
    }

    #[test]
    fn roundtrip_payload_needing_escapes() {
        let payload = [FLAG, ESCAPE, 0x00, FLAG];
        let framed = encode_to_vec(&payload);
        // Every FLAG/ESCAPE byte in the payload must have been escaped, so
        // the only literal FLAG bytes in the wire encoding are the two
        // frame delimiters.
        assert_eq!(framed.iter().filter(|&&b| b == FLAG).count(), 2);

        let mut dec: Decoder<64> = Decoder::new();
        let mut result = None;
        for &b in &framed {
            if let Some(r) = dec.push(b) {
                result = Some(r.map(|f| f.to_vec()));
            }
        }
        assert_eq!(result.unwrap().unwrap(), payload);
    }

    #[test]
    fn corrupted_fcs_is_rejected() {
        let payload = [0xaa, 0xbb];
        let mut framed = encode_to_vec(&payload);
        let last = framed.len() - 2;
        framed[last] ^= 0xff;

        let mut dec: Decoder<64> = Decoder::new();
        let mut result = None;
        for &b in &framed {
            if let Some(r) = dec.push(b) {
                result = Some(r.map(|f| f.to_vec()));
            }
        }
        assert_eq!(result.unwrap(), Err(Error::Parse));
    }

    #[test]
    fn back_to_back_flags_are_absorbed() {
        let mut dec: Decoder<64> = Decoder::new();
        assert!(dec.push(FLAG).is_none());
        assert!(dec.push(FLAG).is_none());
    }

    #[test]
    fn overrun_reports_parse_error_and_recovers() {
        let mut dec: Decoder<4> = Decoder::new();
        dec.push(FLAG);
        for b in 0..8u8 {
            dec.push(b);
        }
        let result = dec.push(FLAG);
        assert_eq!(result, Some(Err(Error::Parse)));

        // The decoder must be usable again for the next frame.
        let payload = [0x01, 0x02];
        let framed = encode_to_vec(&payload);
        let mut result = None;
        for &b in &framed {
            if let Some(r) = dec.push(b) {
                result = Some(r.map(|f| f.to_vec()));
            }
        }
        assert_eq!(result.unwrap().unwrap(), payload);
    }

    proptest::proptest! {
        #[test]
        fn arbitrary_payloads_roundtrip(payload in proptest::collection::vec(proptest::num::u8::ANY, 0..40)) {
            let framed = encode_to_vec(&payload);
            let mut dec: Decoder<64> = Decoder::new();
            let mut result = None;
            for &b in &framed {
                if let Some(r) = dec.push(b) {
                    result = Some(r.map(|f| f.to_vec()));
                }
            }
            proptest::prop_assert_eq!(result.unwrap().unwrap(), payload);
        }
    }
}
