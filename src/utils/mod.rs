pub mod identity;

pub use identity::ParticipantId;

/// Deterministic 31-multiplier string hash over UTF-16 code units, seeded with
/// 23. Identical across runs and processes, unlike `std`'s randomized hasher.
pub fn stable_hash(input: &str) -> u32 {
    let hash = input.encode_utf16().fold(23i32, |hash, unit| {
        hash.wrapping_mul(31).wrapping_add(i32::from(unit))
    });
    hash.unsigned_abs()
}

pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Reduces a peer-supplied file name to a single safe path component.
pub fn sanitize_filename(filename: &str) -> String {
    let last = filename
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    let cleaned: String = last
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match cleaned.trim() {
        "" | "." | ".." => "received_file".to_string(),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_hash_is_deterministic() {
        let id = "3f2a9c1e-0000-4b7e-9d1a-5c6f7e8d9a0b";
        assert_eq!(stable_hash(id), stable_hash(id));
        assert_ne!(stable_hash("alice"), stable_hash("bob"));
    }

    #[test]
    fn test_stable_hash_known_values() {
        assert_eq!(stable_hash(""), 23);
        // 23 * 31 + 'a'
        assert_eq!(stable_hash("a"), 23 * 31 + 97);
        assert_eq!(stable_hash("ab"), (23 * 31 + 97) * 31 + 98);
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(32 * 1024), "32.0 KB");
        assert_eq!(format_file_size(3 * 1024 * 1024 / 2), "1.5 MB");
    }

    #[test]
    fn test_sanitize_filename_strips_directories() {
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\a:b.txt"), "a_b.txt");
        assert_eq!(sanitize_filename(".."), "received_file");
        assert_eq!(sanitize_filename("dir/"), "received_file");
    }
}
