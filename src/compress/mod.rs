// Copyright 2024-2025 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Gzip compression of stored objects and of objects in transit.

use std::io::{self, Read, Write};

use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;

const BUF_SIZE: usize = 64 << 10;

/// Compress everything from `from` into `to`, returning the compressed length.
pub fn compress<W: Write + ?Sized>(from: impl Read, to: &mut W) -> io::Result<u64> {
    let mut encoder = GzEncoder::new(from, Compression::default());
    io::copy(&mut encoder, to)
}

/// Decompress a gzip stream from `from` into `to`, returning the
/// uncompressed length.
pub fn decompress<W: Write + ?Sized>(from: impl Read, to: &mut W) -> io::Result<u64> {
    let mut decoder = GzDecoder::new(from);
    io::copy(&mut decoder, to)
}

/// A reader producing the uncompressed content of a gzip stream.
pub fn decompressing_reader<R: Read>(from: R) -> GzDecoder<R> {
    GzDecoder::new(from)
}

/// Read until `buf` is full or the reader is exhausted.
fn fill(r: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// True if the two readers produce exactly the same bytes.
pub fn readers_equal(mut a: impl Read, mut b: impl Read) -> io::Result<bool> {
    let mut buf_a = vec![0u8; BUF_SIZE];
    let mut buf_b = vec![0u8; BUF_SIZE];
    loop {
        let len_a = fill(&mut a, &mut buf_a)?;
        let len_b = fill(&mut b, &mut buf_b)?;
        if len_a != len_b || buf_a[..len_a] != buf_b[..len_b] {
            return Ok(false);
        }
        if len_a == 0 {
            return Ok(true);
        }
    }
}
