use tracing::warn;
use crate::utils::format_bytes;
use super::errors::ValidationError;
use super::source::FileSource;
use super::types::{MediaCategory, UploadConfig, UploadConfigSet};

/// 上限元数据损坏且无法解析时的默认值：100 MiB
pub const DEFAULT_MAX_SIZE: u64 = 100 * 1024 * 1024;

/// 分片大小无法解析时的默认值：5 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// 某个分类实际生效的限制
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveLimits {
    pub category: MediaCategory,
    pub allowed_types: Vec<String>,
    pub max_size: u64,
    pub max_files: usize,
    pub chunk_size: u64,
    pub folder: String,
}

/// 解析 `<number><unit>` 格式的大小，单位 K/M/G/T，可选后缀 B，不区分大小写
pub fn parse_size(formatted: &str) -> Option<u64> {
    let lower = formatted.trim().to_ascii_lowercase();
    let without_suffix = lower.strip_suffix('b').unwrap_or(&lower).trim_end();

    let unit = without_suffix.chars().last()?;
    let exponent = match unit {
        'k' => 1,
        'm' => 2,
        'g' => 3,
        't' => 4,
        _ => return None,
    };

    let number = without_suffix[..without_suffix.len() - 1].trim();
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value <= 0.0 {
        return None;
    }

    Some((value * 1024f64.powi(exponent)) as u64)
}

/// 数值字段非正数时视为溢出，回退到格式化字符串，再回退到默认值
fn resolve_bytes(numeric: i64, formatted: &str, default: u64, category: MediaCategory, field: &str) -> u64 {
    if numeric > 0 {
        return numeric as u64;
    }

    match parse_size(formatted) {
        Some(bytes) if bytes > 0 => {
            warn!(
                %category,
                field,
                numeric,
                formatted,
                bytes,
                "non-positive size limit from server, recovered from formatted value"
            );
            bytes
        }
        _ => {
            warn!(
                %category,
                field,
                numeric,
                formatted,
                default,
                "non-positive size limit from server and formatted value unusable, using default"
            );
            default
        }
    }
}

pub fn resolve_limits(config: &UploadConfig, category: MediaCategory) -> EffectiveLimits {
    EffectiveLimits {
        category,
        allowed_types: config.allowed_types.clone(),
        max_size: resolve_bytes(
            config.max_size,
            &config.max_size_formatted,
            DEFAULT_MAX_SIZE,
            category,
            "maxSize",
        ),
        max_files: config.max_files,
        chunk_size: resolve_bytes(
            config.chunk_size,
            &config.chunk_size_formatted,
            DEFAULT_CHUNK_SIZE,
            category,
            "chunkSize",
        ),
        folder: config.folder.clone(),
    }
}

/// 扩展名（含点，小写）
pub fn file_extension(file_name: &str) -> Option<String> {
    let (stem, extension) = file_name.rsplit_once('.')?;
    if stem.is_empty() && extension.is_empty() {
        return None;
    }

    Some(format!(".{}", extension.to_ascii_lowercase()))
}

/// MIME 类型优先，其次按扩展名识别
pub fn detect_category(file: &FileSource) -> Option<MediaCategory> {
    file.mime_type
        .as_deref()
        .and_then(MediaCategory::from_mime)
        .or_else(|| file_extension(&file.name).and_then(|ext| MediaCategory::from_extension(&ext)))
}

/// 校验单个文件，返回全部错误；空列表表示通过
pub fn validate_file(file: &FileSource, config: &UploadConfigSet) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let Some(category) = detect_category(file) else {
        errors.push(ValidationError::UnsupportedType {
            file_name: file.name.clone(),
        });
        return errors;
    };

    let limits = resolve_limits(config.get(category), category);
    let extension = file_extension(&file.name).unwrap_or_default();

    if !limits.allowed_types.iter().any(|allowed| *allowed == extension) {
        errors.push(ValidationError::DisallowedExtension {
            file_name: file.name.clone(),
            extension,
        });
    }

    if file.size > limits.max_size {
        errors.push(ValidationError::TooLarge {
            file_name: file.name.clone(),
            size: format_bytes(file.size),
            limit: format_bytes(limits.max_size),
        });
    }

    errors
}

/// 批量校验，单个文件失败不影响其他文件
pub fn validate_files(files: &[FileSource], config: &UploadConfigSet) -> Vec<ValidationError> {
    files
        .iter()
        .flat_map(|file| validate_file(file, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category_config(allowed: &[&str], max_size: i64, formatted: &str) -> UploadConfig {
        UploadConfig {
            allowed_types: allowed.iter().map(|s| s.to_string()).collect(),
            max_size,
            max_size_formatted: formatted.to_string(),
            max_files: 10,
            chunk_size: 2 * 1024 * 1024,
            chunk_size_formatted: "2MB".to_string(),
            folder: "uploads".to_string(),
        }
    }

    fn config_set() -> UploadConfigSet {
        UploadConfigSet {
            image: category_config(&[".jpg", ".png"], 10 * 1024 * 1024, "10MB"),
            video: category_config(&[".mp4", ".mov"], -2147483648, "2GB"),
        }
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("2GB"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_size("2 gb"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_size("500m"), Some(500 * 1024 * 1024));
        assert_eq!(parse_size("1.5K"), Some(1536));
        assert_eq!(parse_size("1T"), Some(1024u64.pow(4)));
        assert_eq!(parse_size("100"), None);
        assert_eq!(parse_size("2B"), None);
        assert_eq!(parse_size("GB"), None);
        assert_eq!(parse_size("-1GB"), None);
        assert_eq!(parse_size(""), None);
    }

    #[test]
    fn test_resolve_limits_positive() {
        let config = config_set();
        let limits = resolve_limits(&config.image, MediaCategory::Image);
        assert_eq!(limits.max_size, 10 * 1024 * 1024);
        assert_eq!(limits.chunk_size, 2 * 1024 * 1024);
    }

    #[test]
    fn test_resolve_limits_overflowed() {
        let config = config_set();
        let limits = resolve_limits(&config.video, MediaCategory::Video);
        assert_eq!(limits.max_size, 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_resolve_limits_fallback_default() {
        let mut config = category_config(&[".mp4"], 0, "lots");
        config.chunk_size = -1;
        config.chunk_size_formatted = String::new();
        let limits = resolve_limits(&config, MediaCategory::Video);
        assert_eq!(limits.max_size, DEFAULT_MAX_SIZE);
        assert_eq!(limits.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_detect_category() {
        let by_ext = FileSource::from_bytes("clip.MP4", vec![0u8; 4]);
        assert_eq!(detect_category(&by_ext), Some(MediaCategory::Video));

        let by_mime = FileSource::from_bytes("blob", vec![0u8; 4]).with_mime_type("image/png");
        assert_eq!(detect_category(&by_mime), Some(MediaCategory::Image));

        let unknown = FileSource::from_bytes("setup.exe", vec![0u8; 4]);
        assert_eq!(detect_category(&unknown), None);
    }

    #[test]
    fn test_validate_unsupported_type() {
        let file = FileSource::from_bytes("setup.exe", vec![0u8; 16]);
        let errors = validate_file(&file, &config_set());
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0],
            ValidationError::UnsupportedType { file_name: "setup.exe".to_string() }
        );
        assert_eq!(errors[0].to_string(), "Unsupported file type: setup.exe");
    }

    #[test]
    fn test_validate_disallowed_extension() {
        let file = FileSource::from_bytes("photo.gif", vec![0u8; 16]);
        let errors = validate_file(&file, &config_set());
        assert_eq!(
            errors,
            vec![ValidationError::DisallowedExtension {
                file_name: "photo.gif".to_string(),
                extension: ".gif".to_string(),
            }]
        );
    }

    #[test]
    fn test_validate_too_large() {
        let file = FileSource::from_bytes("photo.jpg", vec![0u8; 16])
            .with_size(11 * 1024 * 1024);
        let errors = validate_file(&file, &config_set());
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].to_string(),
            "File too large: photo.jpg (11 MB > 10 MB)"
        );
    }

    #[test]
    fn test_validate_accumulates_checks() {
        let file = FileSource::from_bytes("photo.bmp", vec![0u8; 16])
            .with_size(20 * 1024 * 1024);
        let errors = validate_file(&file, &config_set());
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_accepted_files_respect_limits() {
        let config = config_set();
        let files = vec![
            FileSource::from_bytes("a.jpg", vec![0u8; 8]),
            FileSource::from_bytes("b.mp4", vec![0u8; 8]).with_size(1024 * 1024 * 1024),
            FileSource::from_bytes("c.png", vec![0u8; 8]).with_size(10 * 1024 * 1024),
        ];

        for file in &files {
            assert!(validate_file(file, &config).is_empty(), "{} rejected", file.name);
            let category = detect_category(file).unwrap();
            let limits = resolve_limits(config.get(category), category);
            let extension = file_extension(&file.name).unwrap();
            assert!(limits.allowed_types.contains(&extension));
            assert!(file.size <= limits.max_size);
        }
    }

    #[test]
    fn test_validate_files_does_not_stop_at_first() {
        let files = vec![
            FileSource::from_bytes("setup.exe", vec![0u8; 8]),
            FileSource::from_bytes("ok.jpg", vec![0u8; 8]),
            FileSource::from_bytes("readme.txt", vec![0u8; 8]),
        ];
        let errors = validate_files(&files, &config_set());
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].file_name(), "setup.exe");
        assert_eq!(errors[1].file_name(), "readme.txt");
    }
}
