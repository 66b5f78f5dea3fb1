// This file is part of Astarte.
//
// Copyright 2026 SECO Mind Srl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Key derivation function as specified in the protocol.
//!
//! KDF in counter mode per NIST SP 800-108r1, with an 8-bit counter and a
//! 16-bit output length field:
//!
//! ```text
//! K(i) = PRF(K_IN, [i]_1 || Label || 0x00 || Context || [L]_2)
//! ```

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::Error;

pub(crate) fn kdf(
    alg: aws_lc_rs::hmac::Algorithm,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    output: &mut [u8],
) -> Result<(), Error> {
    let k_in = aws_lc_rs::hmac::Key::new(alg, secret);

    let h_out_bytes = alg.digest_algorithm().output_len;

    if h_out_bytes == 0 {
        return Err(Error::new(ErrorKind::Invalid, "digest output len"));
    }

    // Output length in bits, as the trailing [L]_2 field
    let l_bits: u16 = output
        .len()
        .checked_mul(8)
        .and_then(|bits| u16::try_from(bits).ok())
        .ok_or(Error::new(
            ErrorKind::OutOfRange,
            "output len cannot fit in the length field",
        ))?;
    let l_bits = l_bits.to_be_bytes();

    let n: u8 = output
        .len()
        .div_ceil(h_out_bytes)
        .try_into()
        .map_err(|_| {
            Error::new(
                ErrorKind::OutOfRange,
                "iterations cannot fit in the counter",
            )
        })?;

    let mut written = 0;
    for i in 1..=n {
        let mut prf = aws_lc_rs::hmac::Context::with_key(&k_in);
        prf.update(&[i]);
        prf.update(label);
        prf.update(&[0x00]);
        prf.update(context);
        prf.update(&l_bits);
        let block = prf.sign();

        let rem = output.len().saturating_sub(written);
        let take = rem.min(block.as_ref().len());
        output[written..written + take].copy_from_slice(&block.as_ref()[..take]);

        written += take;
    }

    debug_assert_eq!(written, output.len());

    Ok(())
}
