//! Third-party Python packages modules may declare
//!
//! Lookups normalise names the way pip does: case-insensitive, with runs of
//! `-`, `_` and `.` treated as a single `-`.

/// An allowlisted distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowedPackage {
    pub name: &'static str,
    /// Oldest version known to work with the hub runtime
    pub min_version: Option<&'static str>,
    pub purpose: &'static str,
}

const fn pkg(
    name: &'static str,
    min_version: Option<&'static str>,
    purpose: &'static str,
) -> AllowedPackage {
    AllowedPackage {
        name,
        min_version,
        purpose,
    }
}

/// Sorted by name
pub const ALLOWED_PACKAGES: &[AllowedPackage] = &[
    pkg("babel", Some("2.12.0"), "Locale-aware formatting"),
    pkg("beautifulsoup4", Some("4.12.0"), "HTML parsing"),
    pkg("cryptography", Some("41.0.0"), "Cryptographic primitives"),
    pkg("httpx", Some("0.24.0"), "HTTP client"),
    pkg("jinja2", Some("3.1.0"), "Templating"),
    pkg("lxml", Some("4.9.0"), "XML processing"),
    pkg("markdown", Some("3.4.0"), "Markdown rendering"),
    pkg("num2words", None, "Amounts in words on receipts"),
    pkg("openpyxl", Some("3.1.0"), "Excel import and export"),
    pkg("phonenumbers", Some("8.13.0"), "Phone number validation"),
    pkg("pillow", Some("10.0.0"), "Image processing"),
    pkg("pydantic", Some("2.0.0"), "Data validation"),
    pkg("pyserial", Some("3.5"), "Serial port devices"),
    pkg("python-barcode", Some("0.15.0"), "Barcode generation"),
    pkg("python-dateutil", Some("2.8.2"), "Date utilities"),
    pkg("python-escpos", Some("3.0"), "Receipt printers"),
    pkg("pytz", None, "Time zones"),
    pkg("pyusb", Some("1.2.1"), "USB devices"),
    pkg("pyyaml", Some("6.0"), "YAML parsing"),
    pkg("qrcode", Some("7.4"), "QR code generation"),
    pkg("reportlab", Some("4.0.0"), "PDF generation"),
    pkg("requests", Some("2.31.0"), "HTTP client"),
    pkg("xlsxwriter", Some("3.1.0"), "Excel export"),
];

/// pip-style name normalisation
pub fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;

    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
            }
            in_separator = true;
        } else {
            out.push(c.to_ascii_lowercase());
            in_separator = false;
        }
    }

    out
}

/// Find the allowlist entry for a package name
pub fn lookup(name: &str) -> Option<&'static AllowedPackage> {
    let wanted = normalize(name);
    ALLOWED_PACKAGES.iter().find(|p| normalize(p.name) == wanted)
}

pub fn is_allowed(name: &str) -> bool {
    lookup(name).is_some()
}

/// First `n` allowed names, for error messages
pub fn allowed_prefix(n: usize) -> Vec<&'static str> {
    ALLOWED_PACKAGES.iter().take(n).map(|p| p.name).collect()
}

/// Whether `declared` is an older release than `minimum`
///
/// Versions are compared on their leading numeric components, padded to
/// three. Anything that does not look like `N[.N[.N]]` is not compared.
pub fn is_below_minimum(declared: &str, minimum: &str) -> bool {
    match (numeric_version(declared), numeric_version(minimum)) {
        (Some(declared), Some(minimum)) => declared < minimum,
        _ => false,
    }
}

fn numeric_version(version: &str) -> Option<semver::Version> {
    let parts: Vec<u64> = version
        .trim()
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;

    if parts.is_empty() || parts.len() > 3 {
        return None;
    }

    let at = |i: usize| parts.get(i).copied().unwrap_or(0);
    Some(semver::Version::new(at(0), at(1), at(2)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_sorted_and_normalized() {
        let names: Vec<&str> = ALLOWED_PACKAGES.iter().map(|p| p.name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);

        for p in ALLOWED_PACKAGES {
            assert_eq!(normalize(p.name), p.name);
        }
    }

    #[test]
    fn test_lookup_is_case_and_separator_insensitive() {
        assert!(is_allowed("Requests"));
        assert!(is_allowed("python_dateutil"));
        assert!(is_allowed("Python.Barcode"));
        assert_eq!(lookup("PyYAML").map(|p| p.name), Some("pyyaml"));
        assert!(!is_allowed("leftpad"));
    }

    #[test]
    fn test_version_comparison() {
        assert!(is_below_minimum("2.20", "2.31.0"));
        assert!(!is_below_minimum("2.31", "2.31.0"));
        assert!(!is_below_minimum("3.0.0", "2.31.0"));
        assert!(!is_below_minimum("2.31.0rc1", "2.31.0"));
        assert!(is_below_minimum("3.4", "3.5"));
    }

    #[test]
    fn test_allowed_prefix() {
        assert_eq!(allowed_prefix(2), vec!["babel", "beautifulsoup4"]);
        assert_eq!(allowed_prefix(1000).len(), ALLOWED_PACKAGES.len());
    }
}
