// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

/*! One-shot resolution of the host's current timezone identifier.

The identifier is opaque data owned by the host. tzwatch never
interprets its structure, it just locates the string the host is
currently configured with.
*/

use std::{
    env, fmt, fs, io,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::consts;

/// A timezone identifier as reported by the host, typically an
/// IANA-style name like `America/New_York`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimezoneId(String);

impl TimezoneId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TimezoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TimezoneId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for TimezoneId {
    fn from(name: String) -> Self {
        TimezoneId(name)
    }
}

impl From<&str> for TimezoneId {
    fn from(name: &str) -> Self {
        TimezoneId(name.to_string())
    }
}

/// Error raised by [`current`]. The host refused or failed to report
/// its timezone; the caller decides whether to try again.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// None of the places the host records its timezone in yielded an
    /// identifier.
    #[error("could not determine the system timezone")]
    Undetermined,

    /// An unexpected I/O failure while reading the host's timezone
    /// state. Plain missing files are not reported this way, they just
    /// mean the host records its timezone elsewhere.
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Reads the host's current timezone identifier.
///
/// Sources, in order: the `TZ` environment variable, the
/// `/etc/localtime` symlink target, the `/etc/timezone` file. No
/// caching, no retries.
pub fn current() -> Result<TimezoneId, QueryError> {
    if let Some(zone) = zone_from_env() {
        return Ok(zone);
    }
    zone_from_files(Path::new(consts::LOCALTIME_PATH), Path::new(consts::TIMEZONE_FILE_PATH))
}

fn zone_from_env() -> Option<TimezoneId> {
    let val = env::var("TZ").ok()?;
    let zone = zone_name_from_tz_var(&val)?;
    debug!("resolved timezone '{}' from TZ var", zone);
    Some(TimezoneId::from(zone))
}

/// Extracts a zone name from a `TZ` value. POSIX allows a leading `:`
/// and some systems set `TZ` to an absolute path into the zoneinfo
/// database; both spellings resolve to the embedded name. Returns None
/// for values that name no zone (empty, or a path outside zoneinfo).
fn zone_name_from_tz_var(val: &str) -> Option<&str> {
    let val = val.strip_prefix(':').unwrap_or(val);
    if val.is_empty() {
        None
    } else if val.starts_with('/') {
        zone_name_from_path(val)
    } else {
        Some(val)
    }
}

/// Extracts the zone name from a path into a zoneinfo database, e.g.
/// `/usr/share/zoneinfo/posix/Europe/Lisbon` -> `Europe/Lisbon`.
fn zone_name_from_path(path: &str) -> Option<&str> {
    let (_, name) = path.rsplit_once("/zoneinfo/")?;
    let name = consts::ZONEINFO_SUB_DBS
        .iter()
        .find_map(|db| name.strip_prefix(db))
        .unwrap_or(name);
    if name.is_empty() { None } else { Some(name) }
}

/// Resolves the identifier from the given localtime symlink and
/// fallback timezone file. Factored out of [`current`] so the change
/// watcher can point it at scratch copies of the host files.
pub(crate) fn zone_from_files(
    localtime: &Path,
    timezone_file: &Path,
) -> Result<TimezoneId, QueryError> {
    match fs::read_link(localtime) {
        Ok(target) => {
            if let Some(zone) = target.to_str().and_then(zone_name_from_path) {
                debug!("resolved timezone '{}' from {}", zone, localtime.display());
                return Ok(TimezoneId::from(zone));
            }
            // A hard copy of a TZif file, or a link pointing outside
            // zoneinfo. The name is not recoverable from here.
        }
        // InvalidInput is readlink(2) on a non-symlink
        Err(err)
            if err.kind() == io::ErrorKind::NotFound
                || err.kind() == io::ErrorKind::InvalidInput => {}
        Err(source) => return Err(QueryError::Io { path: localtime.to_owned(), source }),
    }

    match fs::read_to_string(timezone_file) {
        Ok(contents) => {
            let zone = contents.trim();
            if zone.is_empty() {
                Err(QueryError::Undetermined)
            } else {
                debug!("resolved timezone '{}' from {}", zone, timezone_file.display());
                Ok(TimezoneId::from(zone))
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(QueryError::Undetermined),
        Err(source) => Err(QueryError::Io { path: timezone_file.to_owned(), source }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use std::os::unix::fs::symlink;

    #[test]
    fn tz_var_spellings() {
        let cases = vec![
            ("America/New_York", Some("America/New_York")),
            (":America/New_York", Some("America/New_York")),
            ("UTC", Some("UTC")),
            ("/usr/share/zoneinfo/Europe/Lisbon", Some("Europe/Lisbon")),
            ("/usr/share/zoneinfo/posix/Etc/UTC", Some("Etc/UTC")),
            ("/usr/share/zoneinfo/right/Asia/Tokyo", Some("Asia/Tokyo")),
            (":/usr/share/zoneinfo/Asia/Tokyo", Some("Asia/Tokyo")),
            ("", None),
            (":", None),
            ("/etc/some/other/file", None),
            ("/usr/share/zoneinfo/", None),
        ];

        for (val, expected) in cases.into_iter() {
            assert_eq!(zone_name_from_tz_var(val), expected, "TZ={val:?}");
        }
    }

    struct Fixture {
        #[allow(dead_code)]
        tmpdir: tempfile::TempDir,
        localtime: PathBuf,
        timezone_file: PathBuf,
        zoneinfo: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmpdir = tempfile::tempdir().unwrap();
        let etc = tmpdir.path().join("etc");
        fs::create_dir_all(&etc).unwrap();
        let zoneinfo = tmpdir.path().join("usr/share/zoneinfo");
        fs::create_dir_all(zoneinfo.join("America")).unwrap();
        fs::write(zoneinfo.join("America/New_York"), "TZif").unwrap();

        Fixture {
            localtime: etc.join("localtime"),
            timezone_file: etc.join("timezone"),
            tmpdir,
            zoneinfo,
        }
    }

    #[test]
    fn localtime_symlink() {
        let fx = fixture();
        symlink(fx.zoneinfo.join("America/New_York"), &fx.localtime).unwrap();

        let zone = zone_from_files(&fx.localtime, &fx.timezone_file).unwrap();
        assert_eq!(zone.as_str(), "America/New_York");
    }

    #[test]
    fn timezone_file_fallback() {
        let fx = fixture();
        fs::write(&fx.timezone_file, "Europe/Lisbon\n").unwrap();

        let zone = zone_from_files(&fx.localtime, &fx.timezone_file).unwrap();
        assert_eq!(zone.as_str(), "Europe/Lisbon");
    }

    #[test]
    fn hard_copy_falls_back_to_timezone_file() {
        let fx = fixture();
        // some hosts copy the TZif data instead of symlinking it
        fs::write(&fx.localtime, "TZif").unwrap();
        fs::write(&fx.timezone_file, "America/New_York").unwrap();

        let zone = zone_from_files(&fx.localtime, &fx.timezone_file).unwrap();
        assert_eq!(zone.as_str(), "America/New_York");
    }

    #[test]
    fn link_outside_zoneinfo_falls_back() {
        let fx = fixture();
        symlink(fx.tmpdir.path().join("somewhere/else"), &fx.localtime).unwrap();
        fs::write(&fx.timezone_file, "Europe/Lisbon").unwrap();

        let zone = zone_from_files(&fx.localtime, &fx.timezone_file).unwrap();
        assert_eq!(zone.as_str(), "Europe/Lisbon");
    }

    #[test]
    fn no_source_is_undetermined() {
        let fx = fixture();
        assert_matches!(
            zone_from_files(&fx.localtime, &fx.timezone_file),
            Err(QueryError::Undetermined)
        );
    }

    #[test]
    fn empty_timezone_file_is_undetermined() {
        let fx = fixture();
        fs::write(&fx.timezone_file, "  \n").unwrap();
        assert_matches!(
            zone_from_files(&fx.localtime, &fx.timezone_file),
            Err(QueryError::Undetermined)
        );
    }
}
