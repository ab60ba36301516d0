//! Binary Stream Helpers
//!
//! Little-endian read/write primitives over `std::io` used by the shader
//! permutation binary and the pipeline serialization format. Strings are
//! length-prefixed UTF-8 (`u16` length).

use std::io::{self, Read, Write};

pub fn write_u8(w: &mut (impl Write + ?Sized), v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

pub fn write_u16(w: &mut (impl Write + ?Sized), v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u32(w: &mut (impl Write + ?Sized), v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u64(w: &mut (impl Write + ?Sized), v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_f32(w: &mut (impl Write + ?Sized), v: f32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_bool(w: &mut (impl Write + ?Sized), v: bool) -> io::Result<()> {
    write_u8(w, u8::from(v))
}

pub fn write_bytes(w: &mut (impl Write + ?Sized), bytes: &[u8]) -> io::Result<()> {
    w.write_all(bytes)
}

/// `u16` length prefix + UTF-8 payload.
pub fn write_str(w: &mut (impl Write + ?Sized), s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    assert!(bytes.len() <= u16::MAX as usize, "string too long for stream");
    write_u16(w, bytes.len() as u16)?;
    w.write_all(bytes)
}

pub fn read_u8(r: &mut (impl Read + ?Sized)) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn read_u16(r: &mut (impl Read + ?Sized)) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub fn read_u32(r: &mut (impl Read + ?Sized)) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_u64(r: &mut (impl Read + ?Sized)) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub fn read_f32(r: &mut (impl Read + ?Sized)) -> io::Result<f32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

pub fn read_bool(r: &mut (impl Read + ?Sized)) -> io::Result<bool> {
    Ok(read_u8(r)? != 0)
}

pub fn read_bytes(r: &mut (impl Read + ?Sized), len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_str(r: &mut (impl Read + ?Sized)) -> io::Result<String> {
    let len = read_u16(r)? as usize;
    let bytes = read_bytes(r, len)?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn roundtrip_primitives() {
        let mut buf = Vec::new();
        write_u8(&mut buf, 7).unwrap();
        write_u16(&mut buf, 0xBEEF).unwrap();
        write_u32(&mut buf, 0xDEAD_BEEF).unwrap();
        write_f32(&mut buf, 1.5).unwrap();
        write_bool(&mut buf, true).unwrap();
        write_str(&mut buf, "Color0").unwrap();

        let mut r = Cursor::new(buf);
        assert_eq!(read_u8(&mut r).unwrap(), 7);
        assert_eq!(read_u16(&mut r).unwrap(), 0xBEEF);
        assert_eq!(read_u32(&mut r).unwrap(), 0xDEAD_BEEF);
        assert!((read_f32(&mut r).unwrap() - 1.5).abs() < f32::EPSILON);
        assert!(read_bool(&mut r).unwrap());
        assert_eq!(read_str(&mut r).unwrap(), "Color0");
    }
}
