//! Embedding Table
//!
//! Token -> vector table loaded from word2vec text or binary files.

use bytes::{Buf, Bytes};
use hashbrown::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, warn};

use crate::config::MalformedPolicy;
use crate::error::{EmbeddingError, Result};

/// Rows preallocated from a text header, which may overstate the file
const TEXT_RESERVE_ROWS: usize = 1 << 16;

/// On-disk layout of a vector table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    /// `token c1 c2 ... cN` per line, optional `rows dims` header
    Text,
    /// `rows dims\n` header, then `token ` followed by N little-endian f32
    Binary,
}

impl TableFormat {
    /// `.bin` files are binary, everything else is text
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("bin") => TableFormat::Binary,
            _ => TableFormat::Text,
        }
    }
}

/// Summary of a completed load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub format: TableFormat,
    /// `(rows, dims)` as declared by the header, if any
    pub header: Option<(usize, usize)>,
    /// Rows accepted into the table
    pub rows: usize,
    /// Rows dropped under [`MalformedPolicy::Skip`]
    pub skipped: usize,
}

/// Immutable token -> vector table, rows in file order
#[derive(Debug, Clone)]
pub struct EmbeddingTable {
    tokens: Vec<String>,
    /// Row-major, `tokens.len() * dim` values
    vectors: Vec<f32>,
    dim: usize,
    lookup: HashMap<String, u32>,
}

impl EmbeddingTable {
    /// Build a table from in-memory rows. Duplicates and dimension
    /// mismatches are rejected.
    pub fn from_rows<I, S>(rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        let mut builder = TableBuilder::new(None, MalformedPolicy::Abort);
        for (i, (token, vector)) in rows.into_iter().enumerate() {
            builder.push(i + 1, token.into(), vector)?;
        }
        builder.finish(0).map(|(table, _)| table)
    }

    /// Load up to `limit` rows from `path`
    pub fn load(path: &Path, limit: usize, policy: MalformedPolicy) -> Result<(Self, LoadReport)> {
        let format = TableFormat::from_path(path);
        debug!("Loading {:?} embedding table from {}", format, path.display());
        match format {
            TableFormat::Text => {
                let reader = BufReader::new(File::open(path)?);
                Self::parse_text(reader, limit, policy)
            }
            TableFormat::Binary => {
                let data = Bytes::from(std::fs::read(path)?);
                Self::parse_binary(data, limit, policy)
            }
        }
    }

    /// Parse the word2vec text dialect, with or without a header line
    pub fn parse_text<R: BufRead>(
        mut reader: R,
        limit: usize,
        policy: MalformedPolicy,
    ) -> Result<(Self, LoadReport)> {
        let mut builder = TableBuilder::new(None, policy);
        let mut header = None;
        let mut buf = Vec::new();
        let mut line_no = 0;

        while builder.len() < limit {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_no += 1;
            let line = String::from_utf8_lossy(&buf);
            let mut parts = line.split_whitespace();
            let Some(token) = parts.next() else {
                continue;
            };
            let components: Vec<&str> = parts.collect();

            if line_no == 1 {
                if let Some((rows, dims)) = parse_header(token, &components) {
                    header = Some((rows, dims));
                    builder.expect_dim(dims);
                    builder.reserve(rows.min(limit).min(TEXT_RESERVE_ROWS), 0);
                    continue;
                }
            }

            if components.is_empty() {
                builder.reject(line_no, "row has no components")?;
                continue;
            }
            let vector: std::result::Result<Vec<f32>, _> =
                components.iter().map(|c| c.parse::<f32>()).collect();
            match vector {
                Ok(vector) => builder.push(line_no, token.to_string(), vector)?,
                Err(e) => builder.reject(line_no, &format!("invalid component: {}", e))?,
            }
        }

        let (table, skipped) = builder.finish(line_no)?;
        let report = LoadReport {
            format: TableFormat::Text,
            header,
            rows: table.len(),
            skipped,
        };
        Ok((table, report))
    }

    /// Parse the word2vec binary dialect
    pub fn parse_binary(
        mut data: Bytes,
        limit: usize,
        policy: MalformedPolicy,
    ) -> Result<(Self, LoadReport)> {
        let header_end = data
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| EmbeddingError::malformed(1, "missing binary header"))?;
        let header_line = data.split_to(header_end);
        data.advance(1);
        let header_text = String::from_utf8_lossy(&header_line);
        let mut parts = header_text.split_whitespace();
        let first = parts.next().unwrap_or_default();
        let rest: Vec<&str> = parts.collect();
        let (rows, dims) = parse_header(first, &rest)
            .ok_or_else(|| EmbeddingError::malformed(1, "invalid binary header"))?;

        let record_len = dims
            .checked_mul(4)
            .ok_or_else(|| EmbeddingError::malformed(1, "declared dimension too large"))?;

        let mut builder = TableBuilder::new(Some(dims), policy);
        let wanted = rows.min(limit);
        let fits = data.len() / record_len.saturating_add(2);
        builder.reserve(wanted.min(fits), wanted.min(fits) * dims);

        let mut record = 1;
        while builder.len() < wanted && record <= rows {
            record += 1;
            while data.first() == Some(&b'\n') {
                data.advance(1);
            }
            let token_end = data
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| EmbeddingError::malformed(record, "truncated record"))?;
            let token_bytes = data.split_to(token_end);
            data.advance(1);
            if data.remaining() < record_len {
                return Err(EmbeddingError::malformed(record, "truncated vector"));
            }
            let vector: Vec<f32> = (0..dims).map(|_| data.get_f32_le()).collect();
            let token = String::from_utf8_lossy(&token_bytes).into_owned();
            builder.push(record, token, vector)?;
        }

        let (table, skipped) = builder.finish(record)?;
        let report = LoadReport {
            format: TableFormat::Binary,
            header: Some((rows, dims)),
            rows: table.len(),
            skipped,
        };
        Ok((table, report))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn contains(&self, token: &str) -> bool {
        self.lookup.contains_key(token)
    }

    /// Row id of `token`
    pub fn id_of(&self, token: &str) -> Option<u32> {
        self.lookup.get(token).copied()
    }

    pub fn token(&self, id: u32) -> &str {
        &self.tokens[id as usize]
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Vector of row `id`
    pub fn vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dim;
        &self.vectors[start..start + self.dim]
    }

    /// Vector of `token`
    pub fn get(&self, token: &str) -> Option<&[f32]> {
        self.id_of(token).map(|id| self.vector(id))
    }

    /// Row-major slice of every vector
    pub fn as_flat(&self) -> &[f32] {
        &self.vectors
    }
}

fn parse_header(first: &str, rest: &[&str]) -> Option<(usize, usize)> {
    if rest.len() != 1 {
        return None;
    }
    let rows = first.parse::<usize>().ok()?;
    let dims = rest[0].parse::<usize>().ok()?;
    (dims > 0).then_some((rows, dims))
}

struct TableBuilder {
    tokens: Vec<String>,
    vectors: Vec<f32>,
    dim: Option<usize>,
    lookup: HashMap<String, u32>,
    policy: MalformedPolicy,
    skipped: usize,
}

impl TableBuilder {
    fn new(dim: Option<usize>, policy: MalformedPolicy) -> Self {
        Self {
            tokens: Vec::new(),
            vectors: Vec::new(),
            dim,
            lookup: HashMap::new(),
            policy,
            skipped: 0,
        }
    }

    fn expect_dim(&mut self, dim: usize) {
        self.dim = Some(dim);
    }

    fn reserve(&mut self, rows: usize, values: usize) {
        self.tokens.reserve(rows);
        self.vectors.reserve(values);
        self.lookup.reserve(rows);
    }

    fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Apply the malformed-row policy
    fn reject(&mut self, line: usize, reason: &str) -> Result<()> {
        match self.policy {
            MalformedPolicy::Abort => Err(EmbeddingError::malformed(line, reason)),
            MalformedPolicy::Skip => {
                warn!("Skipping line {}: {}", line, reason);
                self.skipped += 1;
                Ok(())
            }
        }
    }

    fn push(&mut self, line: usize, token: String, vector: Vec<f32>) -> Result<()> {
        if vector.is_empty() {
            return self.reject(line, "row has no components");
        }
        let dim = *self.dim.get_or_insert(vector.len());
        if vector.len() != dim {
            return Err(EmbeddingError::malformed(
                line,
                format!("expected {} components, got {}", dim, vector.len()),
            ));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return self.reject(line, "non-finite component");
        }
        if self.lookup.contains_key(&token) {
            return self.reject(line, &format!("duplicate token '{}'", token));
        }
        let id = self.tokens.len() as u32;
        self.lookup.insert(token.clone(), id);
        self.tokens.push(token);
        self.vectors.extend_from_slice(&vector);
        Ok(())
    }

    /// Finished table and the number of skipped rows
    fn finish(self, last_line: usize) -> Result<(EmbeddingTable, usize)> {
        if self.tokens.is_empty() {
            return Err(EmbeddingError::malformed(
                last_line,
                "table contains no vectors",
            ));
        }
        let table = EmbeddingTable {
            tokens: self.tokens,
            vectors: self.vectors,
            dim: self.dim.unwrap_or_default(),
            lookup: self.lookup,
        };
        Ok((table, self.skipped))
    }
}
