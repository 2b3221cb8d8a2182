use sofpack_schema::BuildConfig;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Output names shared by the archive and its two sidecars.
///
/// The base name is `tarball` or `tarball-version`. Every output lives at
/// `out_dir/base` plus a suffix, and non-flat archives put their entries
/// under a directory called `base`. The output directory never leaks into
/// entry names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveNames {
    out_dir: PathBuf,
    base_name: String,
    stem: PathBuf,
}

impl ArchiveNames {
    pub fn new(out_dir: &Path, tarball: &str, version: &str) -> Self {
        let base_name = if version.is_empty() {
            tarball.to_owned()
        } else {
            format!("{tarball}-{version}")
        };
        let stem = out_dir.join(&base_name);
        Self {
            out_dir: out_dir.to_path_buf(),
            base_name,
            stem,
        }
    }

    pub fn for_config(out_dir: &Path, config: &BuildConfig) -> Self {
        Self::new(out_dir, &config.tarball, &config.version)
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn tarball_path(&self) -> PathBuf {
        self.with_suffix(".tar.gz")
    }

    pub fn config_snapshot_path(&self) -> PathBuf {
        self.with_suffix(".config.textproto")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.with_suffix(".Manifest")
    }

    /// Name of an artifact inside the archive.
    pub fn entry_name(&self, display_name: &str, flat: bool) -> String {
        if flat {
            display_name.to_owned()
        } else {
            format!("{}/{display_name}", self.base_name)
        }
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut s: OsString = self.stem.clone().into_os_string();
        s.push(suffix);
        PathBuf::from(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unversioned_name_lands_directly_under_out_dir() {
        let n = ArchiveNames::new(Path::new("/out"), "pkg", "");
        assert_eq!(n.base_name(), "pkg");
        assert_eq!(n.tarball_path(), PathBuf::from("/out/pkg.tar.gz"));
    }

    #[test]
    fn versioned_name_is_joined_under_out_dir() {
        let n = ArchiveNames::new(Path::new("/out"), "pkg", "1.0");
        assert_eq!(n.base_name(), "pkg-1.0");
        assert_eq!(n.tarball_path(), PathBuf::from("/out/pkg-1.0.tar.gz"));
        assert_eq!(
            n.config_snapshot_path(),
            PathBuf::from("/out/pkg-1.0.config.textproto")
        );
        assert_eq!(n.manifest_path(), PathBuf::from("/out/pkg-1.0.Manifest"));
    }

    #[test]
    fn relative_out_dir_is_not_doubled() {
        let n = ArchiveNames::new(Path::new("out"), "pkg", "");
        assert_eq!(n.tarball_path(), PathBuf::from("out/pkg.tar.gz"));
    }

    #[test]
    fn empty_out_dir_means_current_directory() {
        let n = ArchiveNames::new(Path::new(""), "pkg", "2");
        assert_eq!(n.tarball_path(), PathBuf::from("pkg-2.tar.gz"));
    }

    #[test]
    fn version_dots_are_not_treated_as_extension() {
        let n = ArchiveNames::new(Path::new("/o"), "sof", "2.2.1");
        assert_eq!(n.tarball_path(), PathBuf::from("/o/sof-2.2.1.tar.gz"));
    }

    #[test]
    fn entry_names_respect_flat_flag() {
        let n = ArchiveNames::new(Path::new("/out"), "pkg", "1.0");
        assert_eq!(n.entry_name("sof-tgl.ri", false), "pkg-1.0/sof-tgl.ri");
        assert_eq!(n.entry_name("sof-tgl.ri", true), "sof-tgl.ri");
    }

    #[test]
    fn entry_prefix_excludes_out_dir() {
        let n = ArchiveNames::new(Path::new("/var/tmp/out"), "pkg", "");
        assert_eq!(n.entry_name("a.ri", false), "pkg/a.ri");
    }
}
