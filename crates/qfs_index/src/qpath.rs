//! Qpath handling.
//!
//! A qpath is a virtual, engine-relative file path. Qpaths use forward
//! slashes, no leading slash, and are compared case-insensitively. Splitting
//! yields (directory, name, extension) where the directory keeps its
//! trailing slash and the extension keeps its leading dot, so joining the
//! parts back reproduces the sanitized input exactly.

/// Maximum qpath length accepted by the indexer, excluding terminator.
pub const MAX_QPATH: usize = 255;

/// Split qpath components. All borrowed from the sanitized buffer owned by
/// the struct, so splitting allocates once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QpathParts {
    sanitized: String,
    dir_len: usize,
    name_len: usize,
}

impl QpathParts {
    /// Split a qpath into directory / name / extension.
    ///
    /// With `ignore_extension` the dot stays part of the name, which is how
    /// pk3 and pk3dir files are registered (their "extension" is meaningful
    /// to the indexer, not to lookups).
    pub fn split(input: &str, ignore_extension: bool) -> QpathParts {
        let sanitized = sanitize(input);

        let dir_len = match sanitized.rfind('/') {
            Some(pos) => pos + 1,
            None => 0,
        };

        let rest = &sanitized[dir_len..];
        let name_len = if ignore_extension {
            rest.len()
        } else {
            match rest.rfind('.') {
                // A leading dot is part of the name, not an extension.
                Some(0) | None => rest.len(),
                Some(pos) => pos,
            }
        };

        QpathParts {
            sanitized,
            dir_len,
            name_len,
        }
    }

    /// Directory including trailing slash, or empty.
    pub fn dir(&self) -> &str {
        &self.sanitized[..self.dir_len]
    }

    /// Filename excluding directory and extension.
    pub fn name(&self) -> &str {
        &self.sanitized[self.dir_len..self.dir_len + self.name_len]
    }

    /// Extension including leading dot, or empty.
    pub fn ext(&self) -> &str {
        &self.sanitized[self.dir_len + self.name_len..]
    }

    /// The full sanitized qpath.
    pub fn qpath(&self) -> &str {
        &self.sanitized
    }
}

/// Join components produced by [`QpathParts::split`].
pub fn join_qpath(dir: &str, name: &str, ext: &str) -> String {
    let mut out = String::with_capacity(dir.len() + name.len() + ext.len());
    out.push_str(dir);
    out.push_str(name);
    out.push_str(ext);
    out
}

/// Convert backslashes and strip leading slashes. Case is preserved;
/// comparisons fold it instead.
pub fn sanitize(input: &str) -> String {
    let converted: String = input
        .chars()
        .map(|c| if c == '\\' { '/' } else { c })
        .collect();
    converted.trim_start_matches('/').to_owned()
}

/// Split off the leading directory component: `"base/maps/x.bsp"` becomes
/// `("base", "maps/x.bsp")`. Without a separator the whole input is the
/// remainder.
pub fn split_leading_directory(input: &str) -> (&str, &str) {
    match input.find('/') {
        Some(pos) => (&input[..pos], &input[pos + 1..]),
        None => ("", input),
    }
}

/// Case-insensitive qpath component comparison.
pub fn qpath_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Bucket hash over (name, extension), excluding the directory, so that
/// same-named files across directories land in one bucket and "any match"
/// lookups stay cheap. Case-folded FNV-1a; this hash feeds the cached hash
/// tables, so changing it requires a cache version bump.
pub fn fs_string_hash(name: &str, ext: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &byte in name.as_bytes().iter().chain(ext.as_bytes()) {
        let folded = byte.to_ascii_lowercase();
        let folded = if folded == b'\\' { b'/' } else { folded };
        hash ^= folded as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}
