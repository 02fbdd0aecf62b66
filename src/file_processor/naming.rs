//! 文件命名规则：`[序列]_c[镜头]_[任务]_v[版本]`，例如 `LIG_c001_txtToImage_v0003.png`。
//!
//! 版本号按 (序列, 镜头, 任务) 三元组单调递增，计数器只从已有的输出文件名中恢复。

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::core::error::PipelineError;
use crate::utils::text::{is_name_token, sanitize_token};

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9]+)_c([0-9]+)_([A-Za-z0-9]+)_v([0-9]+)$").expect("命名规则正则无效")
});

/// 版本计数的键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionKey {
    pub sequence: String,
    pub shot: u32,
    pub task: String,
}

/// 符合命名规则的名称（不含扩展名）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalName {
    pub sequence: String,
    pub shot: u32,
    pub task: String,
    pub version: u32,
}

impl CanonicalName {
    pub fn new(
        sequence: impl Into<String>,
        shot: u32,
        task: impl Into<String>,
        version: u32,
    ) -> Result<Self, PipelineError> {
        let sequence = sequence.into();
        let task = task.into();
        if !is_name_token(&sequence) {
            return Err(PipelineError::InvalidComponent {
                field: "序列",
                value: sequence,
            });
        }
        if !is_name_token(&task) {
            return Err(PipelineError::InvalidComponent {
                field: "任务",
                value: task,
            });
        }
        if version == 0 {
            return Err(PipelineError::InvalidComponent {
                field: "版本",
                value: version.to_string(),
            });
        }
        Ok(Self {
            sequence,
            shot,
            task,
            version,
        })
    }

    /// 解析文件名（可带扩展名），不符合规则时返回 `None`
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = Path::new(file_name).file_stem()?.to_str()?;
        let caps = NAME_PATTERN.captures(stem)?;
        Some(Self {
            sequence: caps[1].to_string(),
            shot: caps[2].parse().ok()?,
            task: caps[3].to_string(),
            version: caps[4].parse().ok()?,
        })
    }

    pub fn key(&self) -> VersionKey {
        VersionKey {
            sequence: self.sequence.clone(),
            shot: self.shot,
            task: self.task.clone(),
        }
    }

    /// `ext` 可以带点也可以不带
    pub fn file_name(&self, ext: &str) -> String {
        let ext = ext.trim_start_matches('.');
        if ext.is_empty() {
            self.to_string()
        } else {
            format!("{}.{}", self, ext)
        }
    }

    pub fn shot_code(&self) -> String {
        format_shot(self.shot)
    }

    pub fn version_code(&self) -> String {
        format_version(self.version)
    }
}

impl fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.sequence,
            format_shot(self.shot),
            self.task,
            format_version(self.version)
        )
    }
}

impl FromStr for CanonicalName {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| PipelineError::InvalidName(s.to_string()))
    }
}

pub fn format_shot(shot: u32) -> String {
    format!("c{:03}", shot)
}

pub fn format_version(version: u32) -> String {
    format!("v{:04}", version)
}

/// 每个 (序列, 镜头, 任务) 已见过的最高版本号
#[derive(Debug, Default, Clone)]
pub struct VersionCounter {
    highest: HashMap<VersionKey, u32>,
}

impl VersionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, key: VersionKey, version: u32) {
        let entry = self.highest.entry(key).or_insert(0);
        if version > *entry {
            *entry = version;
        }
    }

    /// 若文件名符合规则则记录其版本
    pub fn observe_name(&mut self, file_name: &str) -> Option<CanonicalName> {
        let name = CanonicalName::parse(file_name)?;
        self.observe(name.key(), name.version);
        Some(name)
    }

    /// 扫描目录中已有的输出文件名；目录不存在时视为空
    pub fn seed_from_dir(&mut self, dir: &Path, recursive: bool) -> usize {
        if !dir.is_dir() {
            return 0;
        }
        let mut walker = WalkDir::new(dir).min_depth(1);
        if !recursive {
            walker = walker.max_depth(1);
        }
        let mut seen = 0;
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if self.observe_name(name).is_some() {
                    seen += 1;
                }
            }
        }
        debug!("从 {} 恢复了 {} 个已有版本", dir.display(), seen);
        seen
    }

    pub fn highest(&self, key: &VersionKey) -> Option<u32> {
        self.highest.get(key).copied()
    }

    /// 取下一个版本号并立即记录，保证同一键不会重复分配
    pub fn next(&mut self, key: VersionKey) -> Result<u32, PipelineError> {
        let entry = self.highest.entry(key.clone()).or_insert(0);
        let next = entry.checked_add(1).ok_or_else(|| {
            PipelineError::VersionOverflow(format!("{}_{}_{}", key.sequence, format_shot(key.shot), key.task))
        })?;
        *entry = next;
        Ok(next)
    }
}

/// 命名解析结果
#[derive(Debug, Clone)]
pub struct ResolvedName {
    pub name: CanonicalName,
    pub file_name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct NamingManager {
    known_sequences: Vec<String>,
}

impl Default for NamingManager {
    fn default() -> Self {
        Self::new(vec!["LIG".to_string(), "KIAP".to_string()])
    }
}

impl NamingManager {
    pub fn new(known_sequences: Vec<String>) -> Self {
        Self { known_sequences }
    }

    /// 已知序列不区分大小写并转为大写，其它序列只去掉非法字符
    pub fn normalize_sequence(&self, raw: &str) -> Result<String, PipelineError> {
        let trimmed = raw.trim();
        if let Some(known) = self
            .known_sequences
            .iter()
            .find(|k| k.eq_ignore_ascii_case(trimmed))
        {
            return Ok(sanitize_token(&known.to_ascii_uppercase()));
        }
        let cleaned = sanitize_token(trimmed);
        if cleaned.is_empty() {
            return Err(PipelineError::InvalidComponent {
                field: "序列",
                value: raw.to_string(),
            });
        }
        Ok(cleaned)
    }

    /// 计算源文件的规范名称和目标路径
    ///
    /// 版本号为该三元组已知最大版本 + 1；目标路径已被其它文件占用时继续递增。
    pub fn resolve(
        &self,
        source: &Path,
        sequence: &str,
        shot: u32,
        task: &str,
        target_dir: &Path,
        counter: &mut VersionCounter,
    ) -> Result<ResolvedName, PipelineError> {
        let sequence = self.normalize_sequence(sequence)?;
        let probe = CanonicalName::new(sequence, shot, task, 1)?;
        let key = probe.key();

        let source_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if let Some(previous) = CanonicalName::parse(&source_name) {
            // 源文件名里的序列可能未规范化，按规范化后的键记录
            let previous_key = VersionKey {
                sequence: self
                    .normalize_sequence(&previous.sequence)
                    .unwrap_or(previous.sequence.clone()),
                ..previous.key()
            };
            counter.observe(previous_key, previous.version);
            info!("检测到重新处理的文件: {} (之前版本 {})", source_name, previous.version_code());
        }

        let ext = source
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();

        loop {
            let version = counter.next(key.clone())?;
            let name = CanonicalName {
                version,
                ..probe.clone()
            };
            let file_name = name.file_name(&ext);
            let path = target_dir.join(&file_name);
            if path.exists() && !same_file(&path, source) {
                debug!("目标已存在，递增版本: {}", path.display());
                continue;
            }
            info!("应用命名规则: {} -> {}", source_name, file_name);
            return Ok(ResolvedName {
                name,
                file_name,
                path,
            });
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn key(seq: &str, shot: u32, task: &str) -> VersionKey {
        VersionKey {
            sequence: seq.to_string(),
            shot,
            task: task.to_string(),
        }
    }

    #[test]
    fn test_format_and_parse_back() {
        let name = CanonicalName::new("LIG", 1, "txtToImage", 3).unwrap();
        assert_eq!(name.to_string(), "LIG_c001_txtToImage_v0003");
        assert_eq!(name.file_name(".png"), "LIG_c001_txtToImage_v0003.png");
        assert_eq!(CanonicalName::parse(&name.file_name("png")), Some(name.clone()));

        let wide = CanonicalName::new("S01", 1234, "comp", 12345).unwrap();
        assert_eq!(wide.to_string(), "S01_c1234_comp_v12345");
        assert_eq!(wide.to_string().parse::<CanonicalName>().unwrap(), wide);
    }

    #[test]
    fn test_parse_rejects_other_names() {
        assert!(CanonicalName::parse("render_final.png").is_none());
        assert!(CanonicalName::parse("LIG_c001_txt_to_image_v0001.png").is_none());
        assert!(CanonicalName::parse("LIG_c001_comp_v0001_extra.png").is_none());
        assert!("nope".parse::<CanonicalName>().is_err());
    }

    #[test]
    fn test_new_validates_components() {
        assert!(CanonicalName::new("", 1, "comp", 1).is_err());
        assert!(CanonicalName::new("LIG", 1, "comp-x", 1).is_err());
        assert!(CanonicalName::new("LIG", 1, "comp", 0).is_err());
    }

    #[test]
    fn test_counter_strictly_increasing_per_key() {
        let mut counter = VersionCounter::new();
        let a = key("LIG", 1, "comp");
        let b = key("LIG", 2, "comp");
        let mut last = 0;
        for _ in 0..5 {
            let v = counter.next(a.clone()).unwrap();
            assert!(v > last);
            last = v;
        }
        assert_eq!(counter.next(b.clone()).unwrap(), 1);
        counter.observe(a.clone(), 2);
        assert_eq!(counter.highest(&a), Some(5), "较小的版本不会让计数回退");
        counter.observe(b.clone(), 9);
        assert_eq!(counter.next(b).unwrap(), 10);
    }

    #[test]
    fn test_counter_refuses_to_wrap() {
        let mut counter = VersionCounter::new();
        let k = key("LIG", 1, "comp");
        counter.observe(k.clone(), u32::MAX);
        assert!(matches!(counter.next(k.clone()), Err(PipelineError::VersionOverflow(_))));
        assert_eq!(counter.highest(&k), Some(u32::MAX));
    }

    #[test]
    fn test_seed_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("processed").join("batch01");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("LIG_c001_comp_v0002.png"), b"x").unwrap();
        fs::write(nested.join("LIG_c001_comp_v0007.png"), b"x").unwrap();
        fs::write(nested.join("notes.txt"), b"x").unwrap();

        let mut flat = VersionCounter::new();
        assert_eq!(flat.seed_from_dir(dir.path(), false), 1);
        assert_eq!(flat.highest(&key("LIG", 1, "comp")), Some(2));

        let mut deep = VersionCounter::new();
        assert_eq!(deep.seed_from_dir(dir.path(), true), 2);
        assert_eq!(deep.highest(&key("LIG", 1, "comp")), Some(7));

        let mut missing = VersionCounter::new();
        assert_eq!(missing.seed_from_dir(&dir.path().join("absent"), true), 0);
    }

    #[test]
    fn test_normalize_sequence() {
        let naming = NamingManager::default();
        assert_eq!(naming.normalize_sequence("lig").unwrap(), "LIG");
        assert_eq!(naming.normalize_sequence("Kiap").unwrap(), "KIAP");
        assert_eq!(naming.normalize_sequence("seq-01").unwrap(), "seq01");
        assert!(naming.normalize_sequence("--").is_err());
    }

    #[test]
    fn test_resolve_defaults_to_first_version() {
        let dir = tempfile::tempdir().unwrap();
        let naming = NamingManager::default();
        let mut counter = VersionCounter::new();
        let resolved = naming
            .resolve(
                Path::new("/in/render.PNG"),
                "lig",
                1,
                "txtToImage",
                dir.path(),
                &mut counter,
            )
            .unwrap();
        assert_eq!(resolved.file_name, "LIG_c001_txtToImage_v0001.PNG");
        assert_eq!(resolved.path, dir.path().join("LIG_c001_txtToImage_v0001.PNG"));
    }

    #[test]
    fn test_resolve_skips_occupied_targets() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("S01_c002_comp_v0001.exr"), b"old").unwrap();
        fs::write(dir.path().join("S01_c002_comp_v0002.exr"), b"old").unwrap();
        let naming = NamingManager::default();
        let mut counter = VersionCounter::new();
        let resolved = naming
            .resolve(Path::new("/in/a.exr"), "S01", 2, "comp", dir.path(), &mut counter)
            .unwrap();
        assert_eq!(resolved.name.version, 3);
    }

    #[test]
    fn test_resolve_reprocessed_file_bumps_its_version() {
        let dir = tempfile::tempdir().unwrap();
        let naming = NamingManager::default();
        let mut counter = VersionCounter::new();
        let resolved = naming
            .resolve(
                Path::new("/in/LIG_c001_comp_v0004.mov"),
                "LIG",
                1,
                "comp",
                dir.path(),
                &mut counter,
            )
            .unwrap();
        assert_eq!(resolved.name.version_code(), "v0005");
    }

    #[test]
    fn test_resolve_reprocessed_lowercase_source() {
        let dir = tempfile::tempdir().unwrap();
        let naming = NamingManager::default();
        let mut counter = VersionCounter::new();
        let resolved = naming
            .resolve(
                Path::new("/in/lig_c001_comp_v0004.mov"),
                "lig",
                1,
                "comp",
                dir.path(),
                &mut counter,
            )
            .unwrap();
        assert_eq!(resolved.file_name, "LIG_c001_comp_v0005.mov");
    }

    #[test]
    fn test_resolve_fails_at_highest_version() {
        let dir = tempfile::tempdir().unwrap();
        let naming = NamingManager::default();
        let mut counter = VersionCounter::new();
        let err = naming
            .resolve(
                Path::new("/in/LIG_c001_comp_v4294967295.png"),
                "LIG",
                1,
                "comp",
                dir.path(),
                &mut counter,
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::VersionOverflow(_)));
    }

    #[test]
    fn test_known_sequence_with_separator_is_sanitized() {
        let naming = NamingManager::new(vec!["LIG_KIAP".to_string()]);
        assert_eq!(naming.normalize_sequence("lig_kiap").unwrap(), "LIGKIAP");
        let name = CanonicalName::new(naming.normalize_sequence("LIG_KIAP").unwrap(), 1, "comp", 1);
        assert!(name.is_ok());
    }

    #[test]
    fn test_resolve_rejects_bad_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let naming = NamingManager::default();
        let mut counter = VersionCounter::new();
        let err = naming
            .resolve(Path::new("/in/a.png"), "???", 1, "comp", dir.path(), &mut counter)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidComponent { .. }));
    }
}
