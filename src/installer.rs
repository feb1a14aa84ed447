use crate::game::{GamePaths, LOADER_DIR_NAME, LOADER_PROXY};
use anyhow::{bail, Context, Result};
use filetime::{set_file_mtime, FileTime};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Instant,
};
use time::{Date, Month, PrimitiveDateTime, Time as TimeOfDay};
use walkdir::WalkDir;

pub type Progress<'a> = dyn FnMut(&str) + 'a;

const MANIFEST_NAME: &str = "deploy_manifest.json";

/// Installs MelonLoader and the files mods depend on into a game directory.
pub trait Installer: Send + Sync {
    /// Removes previously deployed files and empties the mods folder.
    fn clean(&self, paths: &GamePaths, progress: &mut Progress<'_>) -> Result<usize>;

    /// Whether a loader is already present in the game directory.
    fn loader_installed(&self, paths: &GamePaths) -> bool {
        paths.game_root.join(LOADER_PROXY).is_file() && paths.loader_dir.is_dir()
    }

    fn install_loader(&self, paths: &GamePaths, progress: &mut Progress<'_>) -> Result<usize>;

    fn install_required_files(
        &self,
        paths: &GamePaths,
        progress: &mut Progress<'_>,
    ) -> Result<usize>;
}

/// Installer fed from a local payload folder:
///
/// ```text
/// <payload>/loader/ or <payload>/loader.zip   MelonLoader, extracted into the game root
/// <payload>/UserLibs/                          copied to <game>/UserLibs
/// <payload>/Mods/                              copied to <game>/Mods
/// ```
///
/// Every written file is tracked in `deploy_manifest.json` under `data_dir`.
#[derive(Debug, Clone)]
pub struct ModLoaderInstaller {
    payload_root: PathBuf,
    data_dir: PathBuf,
}

enum LoaderSource {
    Folder(PathBuf),
    Archive(PathBuf),
}

impl ModLoaderInstaller {
    pub fn new(payload_root: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            payload_root: payload_root.into(),
            data_dir: data_dir.into(),
        }
    }

    fn loader_source(&self) -> Option<LoaderSource> {
        let folder = self.payload_root.join("loader");
        if folder.is_dir() {
            return Some(LoaderSource::Folder(folder));
        }
        let archive = self.payload_root.join("loader.zip");
        if archive.is_file() {
            return Some(LoaderSource::Archive(archive));
        }
        None
    }
}

impl Installer for ModLoaderInstaller {
    fn clean(&self, paths: &GamePaths, progress: &mut Progress<'_>) -> Result<usize> {
        let mut manifest = load_manifest(&self.data_dir)?;
        let root = fs::canonicalize(&paths.game_root)
            .with_context(|| format!("resolve {}", paths.game_root.display()))?;
        let mut removed = 0;
        let mut kept = 0;

        // Entries for other game roots and files the user changed stay tracked.
        let mut tracked = Vec::with_capacity(manifest.files.len());
        for file in manifest.files.drain(..) {
            let path = PathBuf::from(&file.path);
            if !path.starts_with(&paths.game_root) {
                tracked.push(file);
                continue;
            }
            if !path.is_file() {
                continue;
            }
            let unchanged = hash_file(&path).ok().as_deref() == Some(file.hash.as_str());
            if !unchanged || !resolves_inside(&path, &root) {
                kept += 1;
                tracked.push(file);
                continue;
            }
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
            prune_empty_parents(&path, &paths.game_root);
            removed += 1;
        }
        manifest.files = tracked;
        save_manifest(&self.data_dir, &manifest)?;
        if kept > 0 {
            progress(&format!("Kept {kept} deployed file(s) changed since install"));
        }

        removed += empty_mods_dir(&paths.mods_dir, progress)?;
        progress(&format!("Removed {removed} file(s)"));
        Ok(removed)
    }

    fn install_loader(&self, paths: &GamePaths, progress: &mut Progress<'_>) -> Result<usize> {
        let written = match self.loader_source() {
            Some(LoaderSource::Folder(source)) => {
                let mut copy = CopyProgress::new(progress, "MelonLoader", count_files(&source));
                let written = copy_tree(&source, &paths.game_root, &mut copy)?;
                copy.finish();
                written
            }
            Some(LoaderSource::Archive(archive)) => {
                progress(&format!("Extracting {}", archive.display()));
                extract_zip(&archive, &paths.game_root, progress)?
            }
            None => bail!(
                "no MelonLoader payload in {}: expected loader/ or loader.zip",
                self.payload_root.display()
            ),
        };
        record_files(&self.data_dir, &written)?;

        if !self.loader_installed(paths) {
            bail!("payload did not provide {LOADER_PROXY} and {LOADER_DIR_NAME}/");
        }
        Ok(written.len())
    }

    fn install_required_files(
        &self,
        paths: &GamePaths,
        progress: &mut Progress<'_>,
    ) -> Result<usize> {
        let mut installed = 0;
        let targets = [
            ("UserLibs", &paths.user_libs_dir),
            ("Mods", &paths.mods_dir),
        ];
        for (folder, dest) in targets {
            let source = self.payload_root.join(folder);
            if !source.is_dir() {
                progress(&format!("No {folder} in payload, skipping"));
                continue;
            }
            let mut copy = CopyProgress::new(progress, folder, count_files(&source));
            let written = copy_tree(&source, dest, &mut copy)?;
            copy.finish();
            record_files(&self.data_dir, &written)?;
            installed += written.len();
        }
        Ok(installed)
    }
}

struct CopyProgress<'a, 'b> {
    reporter: &'a mut Progress<'b>,
    label: &'a str,
    copied: usize,
    total: usize,
    last_report: Instant,
}

impl<'a, 'b> CopyProgress<'a, 'b> {
    fn new(reporter: &'a mut Progress<'b>, label: &'a str, total: usize) -> Self {
        reporter(&format!("Installing {label} ({total} file(s))"));
        Self {
            reporter,
            label,
            copied: 0,
            total: total.max(1),
            last_report: Instant::now(),
        }
    }

    fn bump(&mut self) {
        self.copied = self.copied.saturating_add(1);
        if self.copied % 50 == 0 || self.last_report.elapsed().as_millis() >= 120 {
            let current = self.copied.min(self.total);
            (self.reporter)(&format!("Installing {} {current}/{}", self.label, self.total));
            self.last_report = Instant::now();
        }
    }

    fn finish(&mut self) {
        (self.reporter)(&format!("Installed {} ({} file(s))", self.label, self.copied));
    }
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct DeployManifest {
    files: Vec<DeployedFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DeployedFile {
    path: String,
    hash: String,
}

fn record_files(data_dir: &Path, written: &[PathBuf]) -> Result<()> {
    let mut manifest = load_manifest(data_dir)?;
    for path in written {
        let path_text = path.to_string_lossy().to_string();
        let hash = hash_file(path)?;
        manifest.files.retain(|file| file.path != path_text);
        manifest.files.push(DeployedFile {
            path: path_text,
            hash,
        });
    }
    save_manifest(data_dir, &manifest)
}

fn load_manifest(data_dir: &Path) -> Result<DeployManifest> {
    let path = data_dir.join(MANIFEST_NAME);
    if !path.exists() {
        return Ok(DeployManifest::default());
    }

    let raw = fs::read_to_string(path).context("read manifest")?;
    let manifest = serde_json::from_str(&raw).context("parse manifest")?;
    Ok(manifest)
}

fn save_manifest(data_dir: &Path, manifest: &DeployManifest) -> Result<()> {
    fs::create_dir_all(data_dir).context("create data dir")?;
    let path = data_dir.join(MANIFEST_NAME);
    let raw = serde_json::to_string_pretty(manifest).context("serialize manifest")?;
    let temp = path.with_extension("json.tmp");
    fs::write(&temp, raw).context("write manifest temp")?;
    fs::rename(&temp, &path).context("finalize manifest")?;
    Ok(())
}

fn hash_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher).context("hash file")?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn prune_empty_parents(path: &Path, stop: &Path) {
    for parent in path.ancestors().skip(1) {
        if parent == stop || !parent.starts_with(stop) {
            break;
        }
        if fs::remove_dir(parent).is_err() {
            break;
        }
    }
}

/// Whether `path`'s parent directory, with links resolved, is under `root`.
fn resolves_inside(path: &Path, root: &Path) -> bool {
    path.parent()
        .and_then(|parent| fs::canonicalize(parent).ok())
        .is_some_and(|parent| parent.starts_with(root))
}

/// Leaves an empty, real `Mods/` folder. A linked `Mods` is unlinked, never
/// followed.
fn empty_mods_dir(mods_dir: &Path, progress: &mut Progress<'_>) -> Result<usize> {
    let meta = match fs::symlink_metadata(mods_dir) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(mods_dir).context("create mods dir")?;
            return Ok(0);
        }
        Err(err) => return Err(err).context("inspect mods dir"),
    };

    if meta.file_type().is_symlink() {
        fs::remove_file(mods_dir)
            .or_else(|_| fs::remove_dir(mods_dir))
            .with_context(|| format!("unlink {}", mods_dir.display()))?;
        fs::create_dir_all(mods_dir).context("create mods dir")?;
        progress("Mods was a link; replaced it with an empty folder");
        return Ok(0);
    }
    if !meta.is_dir() {
        bail!("{} is not a folder", mods_dir.display());
    }

    let mut removed = 0;
    for entry in fs::read_dir(mods_dir).context("read mods dir")? {
        let entry = entry.context("mods dir entry")?;
        let path = entry.path();
        // `file_type` does not follow links, so linked folders are unlinked.
        if entry.file_type().context("mods entry type")?.is_dir() {
            removed += count_files(&path);
            fs::remove_dir_all(&path).with_context(|| format!("remove {}", path.display()))?;
        } else {
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn count_files(source: &Path) -> usize {
    WalkDir::new(source)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_ignored_path(entry.path()))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .count()
}

fn copy_tree(
    source: &Path,
    dest: &Path,
    progress: &mut CopyProgress<'_, '_>,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for entry in WalkDir::new(source)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_ignored_path(entry.path()))
    {
        let entry = entry?;
        let rel = entry.path().strip_prefix(source).context("rel path")?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).context("create dir")?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).context("create file dir")?;
            }
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {}", rel.display()))?;
            preserve_mtime(entry.path(), &target);
            progress.bump();
            written.push(target);
        }
    }
    Ok(written)
}

fn extract_zip(path: &Path, dest: &Path, progress: &mut Progress<'_>) -> Result<Vec<PathBuf>> {
    let file = fs::File::open(path).context("open zip")?;
    let mut archive = zip::ZipArchive::new(file).context("read zip")?;
    let mut written = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("zip entry")?;
        let Some(rel) = entry.enclosed_name() else {
            progress(&format!("Skipped {}: outside the game folder", entry.name()));
            continue;
        };
        if is_ignored_path(&rel) {
            continue;
        }

        let out_path = dest.join(rel);
        if entry.is_dir() {
            fs::create_dir_all(&out_path).context("create zip dir")?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).context("create zip dir")?;
        }

        let mut out_file = fs::File::create(&out_path)
            .with_context(|| format!("write {}", out_path.display()))?;
        io::copy(&mut entry, &mut out_file).context("extract zip entry")?;
        if let Some(mtime) = entry.last_modified().and_then(zip_mtime) {
            let _ = set_file_mtime(&out_path, mtime);
        }
        written.push(out_path);
    }

    Ok(written)
}

/// Zip timestamps carry no zone; they are read as UTC.
fn zip_mtime(dt: zip::DateTime) -> Option<FileTime> {
    let month = Month::try_from(dt.month()).ok()?;
    let date = Date::from_calendar_date(i32::from(dt.year()), month, dt.day()).ok()?;
    let time = TimeOfDay::from_hms(dt.hour(), dt.minute(), dt.second()).ok()?;
    let stamp = PrimitiveDateTime::new(date, time).assume_utc().unix_timestamp();
    Some(FileTime::from_unix_time(stamp, 0))
}

fn preserve_mtime(source: &Path, dest: &Path) {
    if let Ok(meta) = fs::metadata(source) {
        let _ = set_file_mtime(dest, FileTime::from_last_modification_time(&meta));
    }
}

fn is_ignored_path(path: &Path) -> bool {
    path.components().any(|component| {
        let part = component.as_os_str().to_string_lossy();
        part.eq_ignore_ascii_case("__MACOSX")
            || part.eq_ignore_ascii_case(".ds_store")
            || part.eq_ignore_ascii_case("thumbs.db")
            || part == ".git"
            || part == ".svn"
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game;
    use std::io::Write;

    struct Fixture {
        _dir: tempfile::TempDir,
        payload: PathBuf,
        data_dir: PathBuf,
        paths: GamePaths,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let game_root = dir.path().join("Menace");
        game::make_fake_game(&game_root);
        let paths = GamePaths::from_root(&game_root).unwrap();
        Fixture {
            payload: dir.path().join("payload"),
            data_dir: dir.path().join("data"),
            paths,
            _dir: dir,
        }
    }

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn quiet() -> impl FnMut(&str) {
        |_: &str| {}
    }

    #[test]
    fn installs_loader_folder_and_required_files() {
        let fx = fixture();
        write(&fx.payload.join("loader/version.dll"), "proxy");
        write(&fx.payload.join("loader/MelonLoader/net6/MelonLoader.dll"), "core");
        write(&fx.payload.join("UserLibs/Lib.dll"), "lib");
        write(&fx.payload.join("Mods/DataExtractor.dll"), "mod");
        write(&fx.payload.join("Mods/.DS_Store"), "junk");

        let installer = ModLoaderInstaller::new(&fx.payload, &fx.data_dir);
        assert!(!installer.loader_installed(&fx.paths));

        let mut messages = Vec::new();
        let mut progress = |line: &str| messages.push(line.to_string());
        assert_eq!(installer.install_loader(&fx.paths, &mut progress).unwrap(), 2);
        assert_eq!(
            installer
                .install_required_files(&fx.paths, &mut progress)
                .unwrap(),
            2
        );

        assert!(installer.loader_installed(&fx.paths));
        assert!(fx.paths.mods_dir.join("DataExtractor.dll").is_file());
        assert!(!fx.paths.mods_dir.join(".DS_Store").exists());
        assert!(fx.paths.user_libs_dir.join("Lib.dll").is_file());
        assert!(messages.iter().any(|line| line == "Installed Mods (1 file(s))"));

        let manifest = load_manifest(&fx.data_dir).unwrap();
        assert_eq!(manifest.files.len(), 4);
    }

    #[test]
    fn missing_loader_payload_fails() {
        let fx = fixture();
        fs::create_dir_all(&fx.payload).unwrap();
        let installer = ModLoaderInstaller::new(&fx.payload, &fx.data_dir);
        let err = installer
            .install_loader(&fx.paths, &mut quiet())
            .unwrap_err();
        assert!(err.to_string().contains("no MelonLoader payload"));
    }

    #[test]
    fn clean_removes_deployed_files_and_empties_mods() {
        let fx = fixture();
        write(&fx.payload.join("loader/version.dll"), "proxy");
        write(&fx.payload.join("loader/MelonLoader/core.dll"), "core");
        let installer = ModLoaderInstaller::new(&fx.payload, &fx.data_dir);
        installer.install_loader(&fx.paths, &mut quiet()).unwrap();

        write(&fx.paths.mods_dir.join("Manual.dll"), "user mod");
        write(&fx.paths.mods_dir.join("Nested/Extra.dll"), "user mod");
        write(&fx.paths.loader_dir.join("Latest.log"), "log");

        let removed = installer.clean(&fx.paths, &mut quiet()).unwrap();
        assert_eq!(removed, 4);
        assert!(!fx.paths.game_root.join("version.dll").exists());
        assert!(fx.paths.mods_dir.is_dir());
        assert_eq!(fs::read_dir(&fx.paths.mods_dir).unwrap().count(), 0);
        // Files the loader generated itself are not ours to delete.
        assert!(fx.paths.loader_dir.join("Latest.log").is_file());
        assert!(!installer.loader_installed(&fx.paths));
        assert!(load_manifest(&fx.data_dir).unwrap().files.is_empty());
    }

    #[test]
    fn clean_keeps_modified_and_foreign_files() {
        let fx = fixture();
        let outside = fx.data_dir.join("outside.txt");
        write(&outside, "outside");
        let inside = fx.paths.game_root.join("changed.cfg");
        write(&inside, "original");
        record_files(&fx.data_dir, &[outside.clone(), inside.clone()]).unwrap();
        fs::write(&inside, "edited by user").unwrap();

        let installer = ModLoaderInstaller::new(&fx.payload, &fx.data_dir);
        let mut messages = Vec::new();
        let removed = installer
            .clean(&fx.paths, &mut |line: &str| messages.push(line.to_string()))
            .unwrap();

        assert_eq!(removed, 0);
        assert!(outside.is_file());
        assert!(inside.is_file());
        assert!(messages[0].starts_with("Kept 1"));
    }

    #[test]
    fn clean_leaves_other_game_roots_tracked() {
        let fx = fixture();
        let demo_root = fx.paths.game_root.with_file_name("Menace Demo");
        game::make_fake_game(&demo_root);
        let demo = GamePaths::from_root(&demo_root).unwrap();
        write(&fx.payload.join("loader/version.dll"), "proxy");
        write(&fx.payload.join("loader/MelonLoader/core.dll"), "core");
        let installer = ModLoaderInstaller::new(&fx.payload, &fx.data_dir);
        installer.install_loader(&fx.paths, &mut quiet()).unwrap();

        assert_eq!(installer.clean(&demo, &mut quiet()).unwrap(), 0);
        assert_eq!(load_manifest(&fx.data_dir).unwrap().files.len(), 2);

        assert_eq!(installer.clean(&fx.paths, &mut quiet()).unwrap(), 2);
        assert!(!fx.paths.game_root.join("version.dll").exists());
        assert!(load_manifest(&fx.data_dir).unwrap().files.is_empty());
    }

    #[test]
    fn changed_files_stay_tracked_until_reinstalled() {
        let fx = fixture();
        write(&fx.payload.join("loader/version.dll"), "proxy");
        write(&fx.payload.join("loader/MelonLoader/core.dll"), "core");
        let installer = ModLoaderInstaller::new(&fx.payload, &fx.data_dir);
        installer.install_loader(&fx.paths, &mut quiet()).unwrap();
        let proxy = fx.paths.game_root.join("version.dll");
        fs::write(&proxy, "patched").unwrap();

        assert_eq!(installer.clean(&fx.paths, &mut quiet()).unwrap(), 1);
        assert!(proxy.is_file());
        assert_eq!(load_manifest(&fx.data_dir).unwrap().files.len(), 1);

        installer.install_loader(&fx.paths, &mut quiet()).unwrap();
        assert_eq!(installer.clean(&fx.paths, &mut quiet()).unwrap(), 2);
        assert!(!proxy.exists());
    }

    #[cfg(unix)]
    #[test]
    fn clean_unlinks_linked_mods_folder() {
        let fx = fixture();
        let shared = fx.data_dir.join("shared_mods");
        write(&shared.join("Keep.dll"), "shared mod");
        std::os::unix::fs::symlink(&shared, &fx.paths.mods_dir).unwrap();

        let installer = ModLoaderInstaller::new(&fx.payload, &fx.data_dir);
        let mut messages = Vec::new();
        let removed = installer
            .clean(&fx.paths, &mut |line: &str| messages.push(line.to_string()))
            .unwrap();

        assert_eq!(removed, 0);
        assert!(shared.join("Keep.dll").is_file());
        let meta = fs::symlink_metadata(&fx.paths.mods_dir).unwrap();
        assert!(meta.is_dir() && !meta.file_type().is_symlink());
        assert_eq!(fs::read_dir(&fx.paths.mods_dir).unwrap().count(), 0);
        assert!(messages[0].starts_with("Mods was a link"));
    }

    #[cfg(unix)]
    #[test]
    fn clean_skips_tracked_files_reached_through_links() {
        let fx = fixture();
        let shared = fx.data_dir.join("shared_libs");
        write(&shared.join("Lib.dll"), "lib");
        std::os::unix::fs::symlink(&shared, &fx.paths.user_libs_dir).unwrap();
        record_files(&fx.data_dir, &[fx.paths.user_libs_dir.join("Lib.dll")]).unwrap();

        let installer = ModLoaderInstaller::new(&fx.payload, &fx.data_dir);
        assert_eq!(installer.clean(&fx.paths, &mut quiet()).unwrap(), 0);
        assert!(shared.join("Lib.dll").is_file());
        assert_eq!(load_manifest(&fx.data_dir).unwrap().files.len(), 1);
    }

    #[test]
    fn zip_payload_skips_escaping_entries() {
        let fx = fixture();
        fs::create_dir_all(&fx.payload).unwrap();
        let archive = fs::File::create(fx.payload.join("loader.zip")).unwrap();
        let mut zip = zip::ZipWriter::new(archive);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("version.dll", options).unwrap();
        zip.write_all(b"proxy").unwrap();
        zip.start_file("MelonLoader/core.dll", options).unwrap();
        zip.write_all(b"core").unwrap();
        zip.start_file("../escape.txt", options).unwrap();
        zip.write_all(b"nope").unwrap();
        zip.finish().unwrap();

        let installer = ModLoaderInstaller::new(&fx.payload, &fx.data_dir);
        let mut messages = Vec::new();
        let written = installer
            .install_loader(&fx.paths, &mut |line: &str| messages.push(line.to_string()))
            .unwrap();

        assert_eq!(written, 2);
        assert!(messages
            .iter()
            .any(|line| line == "Skipped ../escape.txt: outside the game folder"));
        assert!(installer.loader_installed(&fx.paths));
        assert!(!fx.paths.game_root.parent().unwrap().join("escape.txt").exists());
    }
}
