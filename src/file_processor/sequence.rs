use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tracing::debug;

use crate::app::config::FileProcessingConfig;
use crate::core::error::PipelineError;
use crate::file_processor::naming::CanonicalName;

/// (序列, 镜头) 推断结果，序列尚未规范化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShotHint {
    pub sequence: String,
    pub shot: u32,
}

impl ShotHint {
    fn new(sequence: impl Into<String>, shot: u32) -> Self {
        Self {
            sequence: sequence.into(),
            shot,
        }
    }
}

// s01_c001_name.ext
static SEQ_SHOT_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([sS]\d+)_[cC](\d+)[_.]").expect("正则无效"));
// name_s01_c001.ext
static SEQ_SHOT_INFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_([sS]\d+)_[cC](\d+)").expect("正则无效"));
// A_001.jpg
static ALPHA_UNDERSCORE_NUM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z]+)_(\d+)\.").expect("正则无效"));
// A.001.jpg
static ALPHA_DOT_NUM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z]+)\.(\d+)\.").expect("正则无效"));
// 独立的 c001 片段
static SHOT_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[_.\-\s])[cC](\d+)(?:$|[_.\-\s])").expect("正则无效"));

/// 解析 `c001` / `C12` / `7` 形式的镜头号
pub fn parse_shot(value: &str) -> Option<u32> {
    let value = value.trim();
    let digits = value
        .strip_prefix('c')
        .or_else(|| value.strip_prefix('C'))
        .unwrap_or(value);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// 从文件名和所在目录推断序列与镜头
#[derive(Debug, Clone)]
pub struct SequenceResolver {
    known_sequences: Vec<String>,
    known_prefix: Option<Regex>,
    known_word: Option<Regex>,
    default_shot: Option<u32>,
}

impl Default for SequenceResolver {
    fn default() -> Self {
        Self::new(&FileProcessingConfig::default())
    }
}

impl SequenceResolver {
    pub fn new(cfg: &FileProcessingConfig) -> Self {
        let alternation = cfg
            .known_sequences
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| regex::escape(s.trim()))
            .collect::<Vec<_>>()
            .join("|");
        let (known_prefix, known_word) = if alternation.is_empty() {
            (None, None)
        } else {
            (
                Regex::new(&format!(r"(?i)^({})_[cC](\d+)", alternation)).ok(),
                Regex::new(&format!(r"(?i)\b({})\b", alternation)).ok(),
            )
        };
        Self {
            known_sequences: cfg.known_sequences.clone(),
            known_prefix,
            known_word,
            default_shot: cfg.default_shot.as_deref().and_then(parse_shot),
        }
    }

    /// 按优先级尝试各种命名习惯，全部失败返回 `None`
    pub fn infer(&self, path: &Path, scan_root: Option<&Path>) -> Option<ShotHint> {
        let file_name = path.file_name()?.to_string_lossy().to_string();

        if let Some(name) = CanonicalName::parse(&file_name) {
            return Some(ShotHint::new(name.sequence, name.shot));
        }
        if let Some(hint) = self.match_patterns(&file_name) {
            debug!("从文件名推断序列/镜头: {} -> {:?}", file_name, hint);
            return Some(hint);
        }

        let shot = self.shot_from_name(&file_name);

        // 路径中出现已知序列（目录名或文件名中的独立单词）
        if let Some(known) = self.known_in_path(path, scan_root) {
            return shot.map(|s| ShotHint::new(known, s));
        }

        let parent = path.parent()?;
        if scan_root.is_some_and(|root| paths_equal(root, parent)) {
            return None;
        }
        let dir_name = parent.file_name()?.to_string_lossy().to_string();
        if dir_name.trim().is_empty() {
            return None;
        }
        debug!("使用目录名作为序列: {}", dir_name);
        shot.map(|s| ShotHint::new(dir_name, s))
    }

    /// 手动指定的序列/镜头优先，缺失部分再自动推断
    pub fn resolve(
        &self,
        path: &Path,
        scan_root: Option<&Path>,
        sequence_override: Option<&str>,
        shot_override: Option<u32>,
    ) -> Result<ShotHint, PipelineError> {
        let sequence_override = sequence_override.filter(|s| !s.trim().is_empty());
        let hint = match (sequence_override, shot_override) {
            (Some(seq), Some(shot)) => Some(ShotHint::new(seq, shot)),
            (Some(seq), None) => {
                let shot = self
                    .infer(path, scan_root)
                    .map(|h| h.shot)
                    .or_else(|| self.shot_from_name(&file_name_of(path)));
                shot.map(|s| ShotHint::new(seq, s))
            }
            (None, Some(shot)) => self
                .infer(path, scan_root)
                .map(|h| ShotHint::new(h.sequence, shot)),
            (None, None) => self.infer(path, scan_root),
        };
        hint.ok_or_else(|| PipelineError::UnresolvedShot(path.to_path_buf()))
    }

    fn match_patterns(&self, file_name: &str) -> Option<ShotHint> {
        let upper_with_shot = |caps: regex::Captures<'_>| -> Option<ShotHint> {
            Some(ShotHint::new(caps[1].to_uppercase(), caps[2].parse().ok()?))
        };
        if let Some(caps) = SEQ_SHOT_PREFIX.captures(file_name) {
            return upper_with_shot(caps);
        }
        if let Some(caps) = SEQ_SHOT_INFIX.captures(file_name) {
            return upper_with_shot(caps);
        }
        if let Some(caps) = self.known_prefix.as_ref().and_then(|re| re.captures(file_name)) {
            return upper_with_shot(caps);
        }
        if let Some(caps) = ALPHA_UNDERSCORE_NUM.captures(file_name) {
            return upper_with_shot(caps);
        }
        if let Some(caps) = ALPHA_DOT_NUM.captures(file_name) {
            return upper_with_shot(caps);
        }
        None
    }

    /// 文件名中的镜头片段，没有时使用默认镜头
    fn shot_from_name(&self, file_name: &str) -> Option<u32> {
        let stem = Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        SHOT_TOKEN
            .captures(&stem)
            .and_then(|caps| caps[1].parse().ok())
            .or(self.default_shot)
    }

    fn known_in_path(&self, path: &Path, scan_root: Option<&Path>) -> Option<String> {
        let relative = scan_root
            .and_then(|root| path.strip_prefix(root).ok())
            .unwrap_or(path);
        let mut components: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        let file_name = components.pop()?;

        for dir in components.iter().rev() {
            if let Some(known) = self
                .known_sequences
                .iter()
                .find(|k| k.eq_ignore_ascii_case(dir))
            {
                return Some(known.to_uppercase());
            }
        }
        self.known_word
            .as_ref()
            .and_then(|re| re.captures(&file_name))
            .map(|caps| caps[1].to_uppercase())
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn paths_equal(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hint(seq: &str, shot: u32) -> Option<ShotHint> {
        Some(ShotHint::new(seq, shot))
    }

    #[test]
    fn test_parse_shot() {
        assert_eq!(parse_shot("c001"), Some(1));
        assert_eq!(parse_shot("C12"), Some(12));
        assert_eq!(parse_shot("7"), Some(7));
        assert_eq!(parse_shot("shot1"), None);
        assert_eq!(parse_shot("c"), None);
    }

    #[test]
    fn test_filename_patterns() {
        let r = SequenceResolver::default();
        let root = Path::new("/in");
        assert_eq!(r.infer(Path::new("/in/s01_c002_render.png"), Some(root)), hint("S01", 2));
        assert_eq!(r.infer(Path::new("/in/take_s03_c010.mov"), Some(root)), hint("S03", 10));
        assert_eq!(r.infer(Path::new("/in/lig_c005_x.png"), Some(root)), hint("LIG", 5));
        assert_eq!(r.infer(Path::new("/in/A_001.jpg"), Some(root)), hint("A", 1));
        assert_eq!(r.infer(Path::new("/in/b.014.jpg"), Some(root)), hint("B", 14));
        assert_eq!(
            r.infer(Path::new("/in/KIAP_c003_comp_v0002.png"), Some(root)),
            hint("KIAP", 3)
        );
    }

    #[test]
    fn test_known_sequence_folder_and_word() {
        let r = SequenceResolver::default();
        let root = Path::new("/in");
        assert_eq!(r.infer(Path::new("/in/lig/shot_c004.png"), Some(root)), hint("LIG", 4));
        assert_eq!(r.infer(Path::new("/in/final KIAP render.png"), Some(root)), hint("KIAP", 1));
    }

    #[test]
    fn test_parent_directory_as_sequence() {
        let r = SequenceResolver::default();
        let root = Path::new("/in");
        assert_eq!(r.infer(Path::new("/in/forest/image.png"), Some(root)), hint("forest", 1));
        assert_eq!(
            r.infer(Path::new("/in/forest/image_c020.png"), Some(root)),
            hint("forest", 20)
        );
    }

    #[test]
    fn test_unresolvable_at_scan_root() {
        let r = SequenceResolver::default();
        let root = Path::new("/in");
        assert_eq!(r.infer(Path::new("/in/image.png"), Some(root)), None);
        let err = r
            .resolve(Path::new("/in/image.png"), Some(root), None, None)
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnresolvedShot(_)));
    }

    #[test]
    fn test_no_default_shot_means_unresolved() {
        let mut cfg = FileProcessingConfig::default();
        cfg.default_shot = None;
        let r = SequenceResolver::new(&cfg);
        let root = Path::new("/in");
        assert_eq!(r.infer(Path::new("/in/forest/image.png"), Some(root)), None);
        assert_eq!(
            r.infer(Path::new("/in/forest/image_c002.png"), Some(root)),
            hint("forest", 2)
        );
    }

    #[test]
    fn test_overrides() {
        let r = SequenceResolver::default();
        let root = Path::new("/in");
        let path = Path::new("/in/image.png");
        assert_eq!(
            r.resolve(path, Some(root), Some("LIG"), Some(9)).unwrap(),
            ShotHint::new("LIG", 9)
        );
        // 只指定序列时镜头取默认值
        assert_eq!(
            r.resolve(path, Some(root), Some("LIG"), None).unwrap(),
            ShotHint::new("LIG", 1)
        );
        assert_eq!(
            r.resolve(Path::new("/in/s02_c007_x.png"), Some(root), None, Some(3))
                .unwrap(),
            ShotHint::new("S02", 3)
        );
    }
}
