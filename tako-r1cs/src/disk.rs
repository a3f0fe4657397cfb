//! circom `.r1cs` persistence: load a constraint system from the binary file
//! produced by the circuit compiler, and write one back out.
//!
//! File format (version 1, all integers little-endian):
//!   - magic `r1cs` (4B) + version (u32) + section count (u32)
//!   - sections, in any order: type (u32) + body size (u64) + body
//!     - type 1, header: field size n8 (u32), prime (n8 bytes), nWires (u32),
//!       nPubOut (u32), nPubIn (u32), nPrvIn (u32), nLabels (u64),
//!       nConstraints (u32)
//!     - type 2, constraints: nConstraints x (A, B, C), each expression a
//!       term count (u32) followed by (wire id (u32), coefficient (n8 bytes))
//!     - anything else (wire-to-label map, custom gates) is skipped

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

use anyhow::{bail, ensure, Context};
use num_bigint::BigUint;
use tracing::info;

use crate::expression::LinearExpression;
use crate::r1cs::{R1c, R1cs};
use crate::term::{Term, Visibility, MAX_COEFF_ID, MAX_VARIABLE_ID};

const R1CS_MAGIC: [u8; 4] = *b"r1cs";
const R1CS_VERSION: u32 = 1;

const SECTION_HEADER: u32 = 1;
const SECTION_CONSTRAINTS: u32 = 2;

struct Header {
    n8: usize,
    prime: BigUint,
    num_wires: u32,
    num_pub_out: u32,
    num_pub_in: u32,
    num_prv_in: u32,
    num_labels: u64,
    num_constraints: u32,
}

/// Bounds-checked little-endian reader over a byte slice.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> anyhow::Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .with_context(|| {
                format!(
                    "truncated r1cs data: need {} bytes at offset {}, have {}",
                    n,
                    self.pos,
                    self.buf.len()
                )
            })?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self) -> anyhow::Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> anyhow::Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

fn read_header(body: &[u8]) -> anyhow::Result<Header> {
    let mut r = Reader::new(body);
    let n8 = r.u32()? as usize;
    ensure!(n8 > 0 && n8 % 8 == 0, "invalid field size {} in r1cs header", n8);
    let prime = BigUint::from_bytes_le(r.take(n8)?);
    let header = Header {
        n8,
        prime,
        num_wires: r.u32()?,
        num_pub_out: r.u32()?,
        num_pub_in: r.u32()?,
        num_prv_in: r.u32()?,
        num_labels: r.u64()?,
        num_constraints: r.u32()?,
    };
    // Public wires follow the constant wire, so they must fit below nWires.
    let num_public = header.num_pub_out.checked_add(header.num_pub_in);
    ensure!(
        num_public.map_or(false, |n| n < header.num_wires),
        "public wire count {} + {} does not fit in {} wires",
        header.num_pub_out,
        header.num_pub_in,
        header.num_wires
    );
    Ok(header)
}

/// Interns coefficients so each distinct value gets one table slot.
#[derive(Default)]
struct CoeffTable {
    values: Vec<BigUint>,
    index: HashMap<BigUint, u32>,
}

impl CoeffTable {
    fn intern(&mut self, value: BigUint) -> anyhow::Result<u32> {
        if let Some(&id) = self.index.get(&value) {
            return Ok(id);
        }
        let id = self.values.len() as u32;
        ensure!(id <= MAX_COEFF_ID, "coefficient table overflow ({} entries)", id);
        self.values.push(value.clone());
        self.index.insert(value, id);
        Ok(id)
    }
}

fn read_expression(
    r: &mut Reader<'_>,
    header: &Header,
    coeffs: &mut CoeffTable,
) -> anyhow::Result<LinearExpression> {
    let num_terms = r.u32()? as usize;
    // Each term needs at least 4 + n8 bytes; reject counts the body cannot hold.
    ensure!(
        num_terms.saturating_mul(4 + header.n8) <= r.remaining(),
        "term count {} exceeds remaining section data",
        num_terms
    );
    // Cannot overflow: read_header bounds it by nWires.
    let public_end = header.num_pub_out + header.num_pub_in;
    let mut terms = Vec::with_capacity(num_terms);
    for _ in 0..num_terms {
        let wire = r.u32()?;
        ensure!(
            wire < header.num_wires && wire <= MAX_VARIABLE_ID,
            "wire id {} out of range (nWires = {})",
            wire,
            header.num_wires
        );
        let coeff = BigUint::from_bytes_le(r.take(header.n8)?);
        let coeff_id = coeffs.intern(coeff)?;
        let visibility = if wire <= public_end {
            Visibility::Public
        } else {
            Visibility::Secret
        };
        terms.push(Term::new(coeff_id, wire, visibility));
    }
    Ok(LinearExpression::new(terms))
}

/// Parse an in-memory `.r1cs` image.
///
/// Expressions are returned in canonical (sorted) order.
pub fn load_r1cs(name: &str, data: &[u8]) -> anyhow::Result<R1cs> {
    let mut r = Reader::new(data);
    let magic = r.take(4).context("failed to read r1cs magic")?;
    if magic != &R1CS_MAGIC[..] {
        bail!("invalid r1cs magic: expected {:?}, got {:?}", R1CS_MAGIC, magic);
    }
    let version = r.u32()?;
    if version != R1CS_VERSION {
        bail!("unsupported r1cs version: expected {}, got {}", R1CS_VERSION, version);
    }
    let num_sections = r.u32()?;

    let mut header_body = None;
    let mut constraints_body = None;
    for _ in 0..num_sections {
        let section_type = r.u32()?;
        let size = usize::try_from(r.u64()?).context("r1cs section size overflows usize")?;
        let body = r.take(size)?;
        match section_type {
            SECTION_HEADER => header_body = Some(body),
            SECTION_CONSTRAINTS => constraints_body = Some(body),
            _ => {}
        }
    }

    let header = read_header(header_body.context("r1cs file has no header section")?)?;
    let body = constraints_body.context("r1cs file has no constraints section")?;

    let mut coeffs = CoeffTable::default();
    let mut r = Reader::new(body);
    let mut constraints = Vec::with_capacity(header.num_constraints.min(1 << 20) as usize);
    for i in 0..header.num_constraints {
        let l = read_expression(&mut r, &header, &mut coeffs)
            .with_context(|| format!("constraint {} (A)", i))?;
        let rr = read_expression(&mut r, &header, &mut coeffs)
            .with_context(|| format!("constraint {} (B)", i))?;
        let o = read_expression(&mut r, &header, &mut coeffs)
            .with_context(|| format!("constraint {} (C)", i))?;
        constraints.push(R1c::new(l, rr, o));
    }

    let mut r1cs = R1cs {
        name: name.to_string(),
        prime: header.prime,
        coefficients: coeffs.values,
        num_wires: header.num_wires,
        num_pub_out: header.num_pub_out,
        num_pub_in: header.num_pub_in,
        num_prv_in: header.num_prv_in,
        num_labels: header.num_labels,
        constraints,
    };
    r1cs.canonicalize();
    Ok(r1cs)
}

/// Load a `.r1cs` file from disk.
pub fn load_r1cs_file(name: &str, path: &Path) -> anyhow::Result<R1cs> {
    let start = Instant::now();
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let r1cs = load_r1cs(name, &data).with_context(|| format!("failed to parse {}", path.display()))?;

    info!(
        circuit = name,
        path = %path.display(),
        constraints = r1cs.constraint_count(),
        wires = r1cs.num_wires,
        public = r1cs.num_public(),
        coefficients = r1cs.coefficients.len(),
        distinct_expressions = r1cs.distinct_expressions(),
        elapsed_ms = start.elapsed().as_millis(),
        "R1CS loaded"
    );
    Ok(r1cs)
}

fn write_expression(out: &mut Vec<u8>, e: &LinearExpression, coeffs: &[BigUint], n8: usize) -> anyhow::Result<()> {
    out.extend_from_slice(&(e.len() as u32).to_le_bytes());
    for term in e.terms() {
        let (coeff_id, wire, _) = term.unpack();
        let coeff = coeffs
            .get(coeff_id as usize)
            .with_context(|| format!("coefficient index {} not in table", coeff_id))?;
        out.extend_from_slice(&wire.to_le_bytes());
        out.extend_from_slice(&field_bytes(coeff, n8)?);
    }
    Ok(())
}

fn field_bytes(v: &BigUint, n8: usize) -> anyhow::Result<Vec<u8>> {
    let mut bytes = v.to_bytes_le();
    ensure!(bytes.len() <= n8, "value does not fit in {} bytes", n8);
    bytes.resize(n8, 0);
    Ok(bytes)
}

/// Serialize a constraint system into the `.r1cs` binary format.
pub fn encode_r1cs(r1cs: &R1cs) -> anyhow::Result<Vec<u8>> {
    let n8 = ((r1cs.prime.bits() as usize + 63) / 64).max(1) * 8;

    let mut header = Vec::new();
    header.extend_from_slice(&(n8 as u32).to_le_bytes());
    header.extend_from_slice(&field_bytes(&r1cs.prime, n8)?);
    header.extend_from_slice(&r1cs.num_wires.to_le_bytes());
    header.extend_from_slice(&r1cs.num_pub_out.to_le_bytes());
    header.extend_from_slice(&r1cs.num_pub_in.to_le_bytes());
    header.extend_from_slice(&r1cs.num_prv_in.to_le_bytes());
    header.extend_from_slice(&r1cs.num_labels.to_le_bytes());
    header.extend_from_slice(&(r1cs.constraints.len() as u32).to_le_bytes());

    let mut body = Vec::new();
    for c in &r1cs.constraints {
        for e in [&c.l, &c.r, &c.o] {
            write_expression(&mut body, e, &r1cs.coefficients, n8)?;
        }
    }

    let mut out = Vec::with_capacity(12 + 24 + header.len() + body.len());
    out.extend_from_slice(&R1CS_MAGIC);
    out.extend_from_slice(&R1CS_VERSION.to_le_bytes());
    out.extend_from_slice(&2u32.to_le_bytes());
    for (ty, section) in [(SECTION_HEADER, &header), (SECTION_CONSTRAINTS, &body)] {
        out.extend_from_slice(&ty.to_le_bytes());
        out.extend_from_slice(&(section.len() as u64).to_le_bytes());
        out.extend_from_slice(section);
    }
    Ok(out)
}

/// Write a constraint system to disk atomically (write `.tmp`, then rename).
pub fn save_r1cs_file(r1cs: &R1cs, path: &Path) -> anyhow::Result<()> {
    let data = encode_r1cs(r1cs)?;
    let tmp = path.with_extension("r1cs.tmp");
    fs::write(&tmp, &data).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("failed to rename {} into place", tmp.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// BN254 scalar field modulus.
    const BN254_R: &str =
        "21888242871839275222246405745257275088548364400416034343698204186575808495617";

    fn bn254() -> BigUint {
        BN254_R.parse().unwrap()
    }

    /// Hand-assembled file: one constraint `w2 * w2 = w1` plus `(-1)*w3`
    /// on the output side, 1 public output, 1 private input, and an extra
    /// wire-to-label section that must be skipped.
    fn handmade_file() -> Vec<u8> {
        let p = bn254();
        let minus_one = &p - 1u32;
        let mut prime = p.to_bytes_le();
        prime.resize(32, 0);

        let mut header = Vec::new();
        header.extend_from_slice(&32u32.to_le_bytes());
        header.extend_from_slice(&prime);
        header.extend_from_slice(&4u32.to_le_bytes()); // wires
        header.extend_from_slice(&1u32.to_le_bytes()); // pub out
        header.extend_from_slice(&0u32.to_le_bytes()); // pub in
        header.extend_from_slice(&1u32.to_le_bytes()); // prv in
        header.extend_from_slice(&4u64.to_le_bytes()); // labels
        header.extend_from_slice(&1u32.to_le_bytes()); // constraints

        let term = |out: &mut Vec<u8>, wire: u32, coeff: &BigUint| {
            out.extend_from_slice(&wire.to_le_bytes());
            let mut b = coeff.to_bytes_le();
            b.resize(32, 0);
            out.extend_from_slice(&b);
        };
        let one = BigUint::from(1u32);
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_le_bytes());
        term(&mut body, 2, &one);
        body.extend_from_slice(&1u32.to_le_bytes());
        term(&mut body, 2, &one);
        body.extend_from_slice(&2u32.to_le_bytes());
        term(&mut body, 3, &minus_one);
        term(&mut body, 1, &one);

        let labels: Vec<u8> = (0u64..4).flat_map(|l| l.to_le_bytes()).collect();

        let mut out = Vec::new();
        out.extend_from_slice(b"r1cs");
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&3u32.to_le_bytes());
        // Constraints before header: section order is not fixed.
        for (ty, s) in [(2u32, &body), (3u32, &labels), (1u32, &header)] {
            out.extend_from_slice(&ty.to_le_bytes());
            out.extend_from_slice(&(s.len() as u64).to_le_bytes());
            out.extend_from_slice(s);
        }
        out
    }

    #[test]
    fn test_load_handmade() {
        let r1cs = load_r1cs("square", &handmade_file()).unwrap();
        assert_eq!(r1cs.prime, bn254());
        assert_eq!(r1cs.num_wires, 4);
        assert_eq!(r1cs.num_pub_out, 1);
        assert_eq!(r1cs.num_prv_in, 1);
        assert_eq!(r1cs.constraint_count(), 1);
        assert_eq!(r1cs.coefficients.len(), 2);

        let c = &r1cs.constraints[0];
        // Output side is canonicalised: public w1 before secret w3.
        let o: Vec<(u32, Visibility)> =
            c.o.terms().iter().map(|t| (t.variable_id(), t.visibility())).collect();
        assert_eq!(o, vec![(1, Visibility::Public), (3, Visibility::Secret)]);
        assert_eq!(c.l.terms()[0].visibility(), Visibility::Secret);
        assert!(c.l.equal(&c.r));
    }

    #[test]
    fn test_encode_then_load() {
        let original = load_r1cs("square", &handmade_file()).unwrap();
        let reloaded = load_r1cs("square", &encode_r1cs(&original).unwrap()).unwrap();
        assert_eq!(reloaded.num_wires, original.num_wires);
        assert_eq!(reloaded.coefficients, original.coefficients);
        assert_eq!(reloaded.constraint_count(), 1);
        assert!(reloaded.constraints[0].o.equal(&original.constraints[0].o));
    }

    #[test]
    fn test_save_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("circuit.r1cs");
        let original = load_r1cs("square", &handmade_file()).unwrap();
        save_r1cs_file(&original, &path).unwrap();
        let loaded = load_r1cs_file("square", &path).unwrap();
        assert_eq!(loaded.name, "square");
        assert_eq!(loaded.constraint_count(), 1);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut data = handmade_file();
        data[0] = b'x';
        let err = load_r1cs("bad", &data).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_rejects_public_count_overflow() {
        let mut r1cs = load_r1cs("square", &handmade_file()).unwrap();
        r1cs.num_pub_out = u32::MAX;
        r1cs.num_pub_in = 1;
        let err = load_r1cs("overflow", &encode_r1cs(&r1cs).unwrap()).unwrap_err();
        assert!(err.to_string().contains("public wire count"), "{}", err);

        let mut r1cs = load_r1cs("square", &handmade_file()).unwrap();
        r1cs.num_pub_out = 4; // as many public wires as wires in total
        assert!(load_r1cs("too_many", &encode_r1cs(&r1cs).unwrap()).is_err());
    }

    #[test]
    fn test_rejects_truncated() {
        let data = handmade_file();
        assert!(load_r1cs("short", &data[..data.len() - 10]).is_err());
        assert!(load_r1cs("short", &data[..6]).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_wire() {
        let mut r1cs = load_r1cs("square", &handmade_file()).unwrap();
        r1cs.num_wires = 3; // wire 3 is now out of range
        let data = encode_r1cs(&r1cs).unwrap();
        assert!(load_r1cs("square", &data).is_err());
    }
}
