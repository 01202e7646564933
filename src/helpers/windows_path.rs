//! Windows path resolution
//!
//! Normalizes the many shapes a Windows path arrives in (drive-letter,
//! device, extended, UNC, volume-GUID, environment-variable forms) into a
//! per-file-system location, resolving against a target file system for
//! case-insensitive lookups and 8.3 short-name expansion.
//!
//! Supported forms:
//! - `C:\Windows\System32` (drive letter)
//! - `\??\C:\...`, `\\.\C:\...`, `\\?\C:\...` (native and extended)
//! - `\\server\share\...`, `\\?\UNC\server\share\...` (UNC)
//! - `\VOLUME{guid}\...`, `\\?\Volume{guid}\...` (volume identifier)
//! - `%SystemRoot%\...` (environment variables, against a configured map)

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::error::{VfsError, VfsResult};
use crate::vfs::{EntryType, FileEntry, FileSystem};

pub struct WindowsPathResolver {
    file_system: Arc<dyn FileSystem>,
    environment_variables: HashMap<String, String>,
    /// Drive letters this resolver answers for (uppercase, no colon).
    drive_letters: Vec<char>,
    /// Volume GUID identifiers this resolver answers for (uppercase).
    volume_identifiers: Vec<String>,
    /// Short-name cache: directory location -> (8.3 name -> long name).
    short_name_cache: HashMap<String, HashMap<String, String>>,
}

impl WindowsPathResolver {
    pub fn new(file_system: Arc<dyn FileSystem>) -> Self {
        Self {
            file_system,
            environment_variables: HashMap::new(),
            drive_letters: Vec::new(),
            volume_identifiers: Vec::new(),
            short_name_cache: HashMap::new(),
        }
    }

    /// Registers an environment variable for `%name%` expansion. Values
    /// that are themselves drive-letter paths are handled transparently.
    pub fn set_environment_variable(&mut self, name: &str, value: &str) {
        self.environment_variables
            .insert(name.to_uppercase(), value.to_string());
    }

    /// Declares a drive letter this file system is mounted as.
    pub fn add_drive_letter(&mut self, letter: char) {
        self.drive_letters.push(letter.to_ascii_uppercase());
    }

    /// Declares a volume GUID (the text between the braces) this file
    /// system is mounted as.
    pub fn add_volume_identifier(&mut self, identifier: &str) {
        self.volume_identifiers.push(identifier.to_uppercase());
    }

    /// Resolves a Windows path to a location on the target file system.
    pub fn resolve_location(&mut self, windows_path: &str) -> VfsResult<String> {
        let expanded = self.expand_environment_variables(windows_path)?;
        let relative = self.strip_path_prefix(&expanded)?;
        trace!(windows_path, relative = relative.as_str(), "normalized path form");

        let mut segments: Vec<String> = Vec::new();
        for segment in relative.split('\\').filter(|s| !s.is_empty()) {
            match segment {
                "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other.to_string()),
            }
        }

        // Walk segment by segment: exact first, then short-name expansion,
        // then case-insensitive lookup.
        let mut location = String::new();
        for segment in segments {
            let resolved = self.resolve_segment(&location, &segment)?;
            location.push('/');
            location.push_str(&resolved);
        }
        if location.is_empty() {
            location.push('/');
        }
        Ok(location)
    }

    fn expand_environment_variables(&self, path: &str) -> VfsResult<String> {
        if !path.contains('%') {
            return Ok(path.to_string());
        }
        let mut out = String::new();
        let mut rest = path;
        while let Some(start) = rest.find('%') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let Some(end) = after.find('%') else {
                return Err(VfsError::PathSpec(format!(
                    "unterminated environment variable in {}",
                    path
                )));
            };
            let name = &after[..end];
            let value = self
                .environment_variables
                .get(&name.to_uppercase())
                .ok_or_else(|| {
                    VfsError::NotFound(format!("environment variable %{}%", name))
                })?;
            out.push_str(value);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Strips the path form prefix, validating drive letters and volume
    /// identifiers against the configured ones. Returns the share- or
    /// volume-relative remainder in backslash form.
    fn strip_path_prefix(&self, path: &str) -> VfsResult<String> {
        // Extended UNC first: it shares the \\?\ prefix with the plain
        // extended form.
        if let Some(unc) = path.strip_prefix("\\\\?\\UNC\\") {
            return self.strip_unc(unc);
        }
        // Native and extended prefixes reduce to the plain form.
        if let Some(inner) = path
            .strip_prefix("\\??\\")
            .or_else(|| path.strip_prefix("\\\\?\\"))
            .or_else(|| path.strip_prefix("\\\\.\\"))
        {
            return self.strip_path_prefix(inner);
        }
        if let Some(unc) = path.strip_prefix("\\\\") {
            return self.strip_unc(unc);
        }
        if let Some(volume) = strip_volume_prefix(path) {
            let (identifier, remainder) = volume;
            if !self.volume_identifiers.is_empty()
                && !self.volume_identifiers.contains(&identifier.to_uppercase())
            {
                return Err(VfsError::NotFound(format!(
                    "volume {{{}}} is not mounted on this resolver",
                    identifier
                )));
            }
            return Ok(remainder);
        }

        let bytes = path.as_bytes();
        if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
            let letter = (bytes[0] as char).to_ascii_uppercase();
            if !self.drive_letters.is_empty() && !self.drive_letters.contains(&letter) {
                return Err(VfsError::NotFound(format!(
                    "drive {}: is not mounted on this resolver",
                    letter
                )));
            }
            return Ok(path[2..].to_string());
        }
        // Already relative to the file system root.
        Ok(path.to_string())
    }

    fn strip_unc(&self, share_path: &str) -> VfsResult<String> {
        // server\share\rest -> rest
        let mut parts = share_path.splitn(3, '\\');
        let server = parts.next().unwrap_or_default();
        let share = parts.next().unwrap_or_default();
        if server.is_empty() || share.is_empty() {
            return Err(VfsError::PathSpec(format!(
                "malformed UNC path: \\\\{}",
                share_path
            )));
        }
        Ok(parts.next().unwrap_or_default().to_string())
    }

    fn resolve_segment(&mut self, parent_location: &str, segment: &str) -> VfsResult<String> {
        let parent_key = if parent_location.is_empty() {
            "/".to_string()
        } else {
            parent_location.to_string()
        };

        let exact = format!(
            "{}/{}",
            if parent_location == "/" { "" } else { parent_location },
            segment
        );
        if self.exists(&exact) {
            return Ok(segment.to_string());
        }

        // 8.3 short names: expand from a per-directory cache built on
        // first use.
        if is_short_name(segment) {
            if let Some(long_name) = self.expand_short_name(&parent_key, segment)? {
                return Ok(long_name);
            }
        }

        // Case-insensitive fallback over the directory listing.
        for child in self.child_names(&parent_key)? {
            if child.eq_ignore_ascii_case(segment) {
                return Ok(child);
            }
        }
        Err(VfsError::NotFound(format!(
            "{} in {}",
            segment, parent_key
        )))
    }

    fn exists(&self, location: &str) -> bool {
        matches!(self.entry_at(location), Ok(Some(_)))
    }

    fn entry_at(&self, location: &str) -> VfsResult<Option<Box<dyn FileEntry>>> {
        let mut current = self.file_system.root_entry()?;
        for segment in location.split('/').filter(|s| !s.is_empty()) {
            let mut next = None;
            for child in current.sub_entries()? {
                let child = child?;
                if child.name() == segment {
                    next = Some(child);
                    break;
                }
            }
            match next {
                Some(entry) => current = entry,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    fn child_names(&self, location: &str) -> VfsResult<Vec<String>> {
        let Some(entry) = self.entry_at(location)? else {
            return Ok(Vec::new());
        };
        if entry.entry_type() != EntryType::Directory {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for child in entry.sub_entries()? {
            names.push(child?.name());
        }
        Ok(names)
    }

    /// Expands an 8.3 name like `PROGRA~1` from the directory's long
    /// names, generating contractions the way the short-name allocator
    /// numbers colliding prefixes.
    fn expand_short_name(
        &mut self,
        directory: &str,
        short_name: &str,
    ) -> VfsResult<Option<String>> {
        if !self.short_name_cache.contains_key(directory) {
            let mut table: HashMap<String, String> = HashMap::new();
            let mut names = self.child_names(directory)?;
            names.sort();

            let mut ordinals: HashMap<String, u32> = HashMap::new();
            for name in names {
                let contracted = contract_name(&name);
                let ordinal = ordinals.entry(contracted.clone()).or_insert(0);
                *ordinal += 1;
                table.insert(format!("{}~{}", contracted, ordinal), name);
            }
            self.short_name_cache.insert(directory.to_string(), table);
        }
        Ok(self
            .short_name_cache
            .get(directory)
            .and_then(|table| table.get(&short_name.to_uppercase()))
            .cloned())
    }
}

/// `\VOLUME{guid}\rest` (also reached from `\\?\Volume{guid}\rest` once the
/// extended prefix is stripped) -> (guid, rest)
fn strip_volume_prefix(path: &str) -> Option<(String, String)> {
    // Volume GUID prefixes are ASCII; byte offsets below rely on that.
    if !path.is_ascii() {
        return None;
    }
    let upper = path.to_uppercase();
    let prefix_len = if upper.starts_with("\\VOLUME{") {
        8
    } else if upper.starts_with("VOLUME{") {
        7
    } else {
        return None;
    };
    let rest = &upper[prefix_len..];
    let brace = rest.find('}')?;
    let identifier = rest[..brace].to_string();
    let remainder_start = prefix_len + brace + 1;
    Some((identifier, path[remainder_start..].to_string()))
}

/// Whether a segment looks like an 8.3 contraction (`NAME~N` or
/// `NAME~N.EXT`).
fn is_short_name(segment: &str) -> bool {
    let base = segment.split('.').next().unwrap_or(segment);
    if base.len() > 8 || !base.contains('~') {
        return false;
    }
    let Some((prefix, ordinal)) = base.rsplit_once('~') else {
        return false;
    };
    !prefix.is_empty() && !ordinal.is_empty() && ordinal.chars().all(|c| c.is_ascii_digit())
}

/// Uppercased six-character contraction of a long name, the prefix part of
/// its generated 8.3 name.
fn contract_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '.')
        .collect();
    cleaned.to_uppercase().chars().take(6).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::fake::FakeFileSystemBuilder;

    fn windows_fs() -> Arc<crate::vfs::fake::FakeFileSystem> {
        FakeFileSystemBuilder::new()
            .add_file("/Windows/System32/config/SYSTEM", b"hive")
            .add_file("/Program Files/App/app.exe", b"MZ")
            .add_file("/Users/Examiner/NTUSER.DAT", b"regf")
            .build()
    }

    fn resolver() -> WindowsPathResolver {
        let mut resolver = WindowsPathResolver::new(windows_fs());
        resolver.add_drive_letter('C');
        resolver.add_volume_identifier("11111111-2222-3333-4444-555555555555");
        resolver
    }

    #[test]
    fn test_drive_letter_path() {
        let mut resolver = resolver();
        assert_eq!(
            resolver
                .resolve_location("C:\\Windows\\System32\\config\\SYSTEM")
                .unwrap(),
            "/Windows/System32/config/SYSTEM"
        );
    }

    #[test]
    fn test_unknown_drive_rejected() {
        let mut resolver = resolver();
        assert!(matches!(
            resolver.resolve_location("D:\\anything"),
            Err(VfsError::NotFound(_))
        ));
    }

    #[test]
    fn test_native_and_extended_forms() {
        let mut resolver = resolver();
        for form in [
            "\\??\\C:\\Windows\\System32\\config\\SYSTEM",
            "\\\\.\\C:\\Windows\\System32\\config\\SYSTEM",
            "\\\\?\\C:\\Windows\\System32\\config\\SYSTEM",
        ] {
            assert_eq!(
                resolver.resolve_location(form).unwrap(),
                "/Windows/System32/config/SYSTEM",
                "form: {}",
                form
            );
        }
    }

    #[test]
    fn test_unc_forms() {
        let mut resolver = resolver();
        assert_eq!(
            resolver
                .resolve_location("\\\\server\\share\\Users\\Examiner\\NTUSER.DAT")
                .unwrap(),
            "/Users/Examiner/NTUSER.DAT"
        );
        assert_eq!(
            resolver
                .resolve_location("\\\\?\\UNC\\server\\share\\Users\\Examiner\\NTUSER.DAT")
                .unwrap(),
            "/Users/Examiner/NTUSER.DAT"
        );
    }

    #[test]
    fn test_volume_guid_form() {
        let mut resolver = resolver();
        assert_eq!(
            resolver
                .resolve_location(
                    "\\VOLUME{11111111-2222-3333-4444-555555555555}\\Users\\Examiner\\NTUSER.DAT"
                )
                .unwrap(),
            "/Users/Examiner/NTUSER.DAT"
        );
        assert!(resolver
            .resolve_location("\\VOLUME{99999999-0000-0000-0000-000000000000}\\x")
            .is_err());
    }

    #[test]
    fn test_environment_variable_expansion() {
        let mut resolver = resolver();
        resolver.set_environment_variable("SystemRoot", "C:\\Windows");
        assert_eq!(
            resolver
                .resolve_location("%SystemRoot%\\System32\\config\\SYSTEM")
                .unwrap(),
            "/Windows/System32/config/SYSTEM"
        );
        assert!(matches!(
            resolver.resolve_location("%Undefined%\\x"),
            Err(VfsError::NotFound(_))
        ));
    }

    #[test]
    fn test_case_insensitive_segments() {
        let mut resolver = resolver();
        assert_eq!(
            resolver
                .resolve_location("C:\\windows\\SYSTEM32\\Config\\system")
                .unwrap(),
            "/Windows/System32/config/SYSTEM"
        );
    }

    #[test]
    fn test_short_name_expansion() {
        let mut resolver = resolver();
        assert_eq!(
            resolver
                .resolve_location("C:\\PROGRA~1\\App\\app.exe")
                .unwrap(),
            "/Program Files/App/app.exe"
        );
    }

    #[test]
    fn test_dot_segments() {
        let mut resolver = resolver();
        assert_eq!(
            resolver
                .resolve_location("C:\\Windows\\.\\System32\\..\\System32\\config\\SYSTEM")
                .unwrap(),
            "/Windows/System32/config/SYSTEM"
        );
    }
}
