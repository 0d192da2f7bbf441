//! 文件类型识别与有效性校验
//!
//! 类型由扩展名决定；校验只读取文件头（最多 8KB）和必要时的文件尾（最多 1KB），
//! 任何 IO 错误都转换为无效原因，不会中断扫描。

use super::models::FileType;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

const HEAD_LEN: u64 = 8192;
const TAIL_LEN: u64 = 1024;

// 文件魔数
const PDF_MAGIC: &[u8] = b"%PDF";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B];
const SEVEN_ZIP_MAGIC: &[u8] = &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];
const RAR_MAGIC: &[u8] = b"Rar!\x1A\x07";

/// 识别结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub extension: String,
    pub file_type: FileType,
    /// `Err` 中为无效原因
    pub verdict: Result<(), String>,
}

/// 提取规范化扩展名（小写、不带点）
pub fn normalize_extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().trim_start_matches('.').to_lowercase())
        .unwrap_or_default()
}

/// 扩展名到文件类型的映射
pub fn file_type_for_extension(ext: &str) -> FileType {
    match ext {
        "pdf" => FileType::Pdf,
        "doc" | "docx" | "docm" | "dot" | "dotx" => FileType::Word,
        "xls" | "xlsx" | "xlsm" | "xlsb" | "xlt" | "xltx" | "csv" => FileType::Excel,
        "ppt" | "pptx" | "pptm" | "pot" | "potx" | "pps" | "ppsx" => FileType::Ppt,
        "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" | "tif" | "tiff" => FileType::Image,
        "zip" | "gz" | "tgz" | "7z" | "rar" | "tar" => FileType::Archive,
        "txt" | "md" | "log" | "json" | "xml" => FileType::Text,
        _ => FileType::Unknown,
    }
}

/// 识别文件类型，`validate` 为 false 时一律视为有效
pub fn classify(path: &Path, validate: bool) -> Classification {
    let extension = normalize_extension(path);
    let file_type = file_type_for_extension(&extension);
    let verdict = if validate {
        validate_file(path, &extension, file_type)
    } else {
        Ok(())
    };
    Classification {
        extension,
        file_type,
        verdict,
    }
}

/// 文件头与文件尾的采样
struct Sample {
    size: u64,
    head: Vec<u8>,
    tail: Vec<u8>,
}

fn read_sample(path: &Path, with_tail: bool) -> Result<Sample, String> {
    let mut file = File::open(path).map_err(|e| format!("无法打开文件: {}", e))?;
    let size = file
        .metadata()
        .map_err(|e| format!("无法获取文件信息: {}", e))?
        .len();

    if size == 0 {
        return Err("文件为空".to_string());
    }

    let mut head = Vec::with_capacity(HEAD_LEN.min(size) as usize);
    (&mut file)
        .take(HEAD_LEN)
        .read_to_end(&mut head)
        .map_err(|e| format!("无法读取文件头: {}", e))?;

    if head.len() < 4 {
        return Err("文件太小，无法验证".to_string());
    }

    let mut tail = Vec::new();
    if with_tail {
        let tail_len = TAIL_LEN.min(size);
        file.seek(SeekFrom::End(-(tail_len as i64)))
            .and_then(|_| file.read_to_end(&mut tail))
            .map_err(|e| format!("无法读取文件尾部: {}", e))?;
    }

    Ok(Sample { size, head, tail })
}

/// 校验文件内容是否与其类型相符
pub fn validate_file(path: &Path, extension: &str, file_type: FileType) -> Result<(), String> {
    let with_tail = matches!(file_type, FileType::Pdf)
        || (file_type == FileType::Archive && extension == "zip");
    let sample = read_sample(path, with_tail)?;

    match file_type {
        FileType::Pdf => validate_pdf(&sample),
        FileType::Word | FileType::Excel | FileType::Ppt => validate_office(&sample, file_type),
        FileType::Image => validate_image(&sample, extension),
        FileType::Archive => validate_archive(&sample, extension),
        FileType::Text => {
            if is_mostly_printable(&sample.head) {
                Ok(())
            } else {
                Err("文本文件包含过多二进制内容".to_string())
            }
        }
        FileType::Unknown => Ok(()),
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn validate_pdf(sample: &Sample) -> Result<(), String> {
    if !sample.head.starts_with(PDF_MAGIC) {
        return Err("不是有效的PDF文件（文件头不匹配）".to_string());
    }
    if sample.size < 10 {
        return Err("PDF文件太小".to_string());
    }
    if !contains(&sample.tail, b"%%EOF") {
        return Err("PDF文件可能已损坏（缺少EOF标记）".to_string());
    }
    let prefix = &sample.head[..sample.head.len().min(4096)];
    if !contains(prefix, b"obj") {
        return Err("PDF文件结构异常".to_string());
    }
    Ok(())
}

fn validate_office(sample: &Sample, file_type: FileType) -> Result<(), String> {
    if sample.head.starts_with(ZIP_MAGIC) {
        return validate_ooxml(&sample.head, file_type);
    }
    if sample.head.starts_with(OLE_MAGIC) {
        return validate_ole2(sample);
    }
    // CSV 是纯文本
    if file_type == FileType::Excel && is_mostly_printable(&sample.head) {
        return Ok(());
    }
    Err("不是有效的Office文件（文件头不匹配）".to_string())
}

fn validate_ooxml(head: &[u8], file_type: FileType) -> Result<(), String> {
    let has_content_types = contains(head, b"[Content_Types].xml");

    let markers: &[&[u8]] = match file_type {
        FileType::Word => &[&b"word/"[..], &b"document.xml"[..]],
        FileType::Excel => &[&b"xl/"[..], &b"workbook.xml"[..], &b"sheet"[..]],
        FileType::Ppt => &[&b"ppt/"[..], &b"presentation.xml"[..], &b"slide"[..]],
        _ => &[],
    };
    if markers.iter().any(|m| contains(head, m)) || has_content_types {
        return Ok(());
    }

    // 加密文档只有 ZIP 条目，没有内容类型清单
    if !contains(&head[4..], b"PK") {
        return Err("Office文件结构异常".to_string());
    }
    Err("Office文件内容异常".to_string())
}

fn validate_ole2(sample: &Sample) -> Result<(), String> {
    if sample.head.len() < 512 {
        return Err("无法读取OLE2头部".to_string());
    }
    // 扇区大小以 2 的幂存储：9 => 512，12 => 4096
    let sector_shift = u16::from_le_bytes([sample.head[30], sample.head[31]]);
    if sector_shift != 9 && sector_shift != 12 {
        return Err("OLE2扇区大小异常".to_string());
    }
    if sample.size < 1536 {
        return Err("OLE2文件太小".to_string());
    }
    Ok(())
}

fn validate_image(sample: &Sample, extension: &str) -> Result<(), String> {
    let head = sample.head.as_slice();
    let ok = match extension {
        "png" => head.starts_with(PNG_MAGIC) && head.len() >= 16 && &head[12..16] == b"IHDR",
        "jpg" | "jpeg" => head.starts_with(JPEG_MAGIC),
        "gif" => head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a"),
        "bmp" => head.starts_with(b"BM"),
        "webp" => head.len() >= 12 && head.starts_with(b"RIFF") && &head[8..12] == b"WEBP",
        "tif" | "tiff" => head.starts_with(b"II*\0") || head.starts_with(b"MM\0*"),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("图片文件头损坏或与扩展名 .{} 不符", extension))
    }
}

fn validate_archive(sample: &Sample, extension: &str) -> Result<(), String> {
    let head = sample.head.as_slice();
    match extension {
        "zip" => {
            if !head.starts_with(ZIP_MAGIC) && !head.starts_with(ZIP_EMPTY_MAGIC) {
                return Err("不是有效的ZIP文件（文件头不匹配）".to_string());
            }
            if !contains(&sample.tail, ZIP_EMPTY_MAGIC) {
                return Err("ZIP文件可能已损坏（缺少中央目录结束标记）".to_string());
            }
            Ok(())
        }
        "gz" | "tgz" if !head.starts_with(GZIP_MAGIC) => {
            Err("不是有效的GZIP文件（文件头不匹配）".to_string())
        }
        "7z" if !head.starts_with(SEVEN_ZIP_MAGIC) => {
            Err("不是有效的7z文件（文件头不匹配）".to_string())
        }
        "rar" if !head.starts_with(RAR_MAGIC) => {
            Err("不是有效的RAR文件（文件头不匹配）".to_string())
        }
        "tar" if !(head.len() >= 262 && &head[257..262] == b"ustar") => {
            Err("不是有效的TAR文件（缺少ustar标记）".to_string())
        }
        _ => Ok(()),
    }
}

/// 超过 90% 为可打印字符（含换行、制表符与 UTF-8 多字节）时视为文本
fn is_mostly_printable(content: &[u8]) -> bool {
    if content.is_empty() {
        return false;
    }
    let printable = content
        .iter()
        .filter(|&&b| (32..=126).contains(&b) || matches!(b, b'\n' | b'\r' | b'\t') || b >= 0x80)
        .count();
    printable as f64 / content.len() as f64 > 0.9
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn png_bytes() -> Vec<u8> {
        let mut data = PNG_MAGIC.to_vec();
        data.extend_from_slice(&[0, 0, 0, 13]);
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&[0u8; 32]);
        data
    }

    fn write(dir: &TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_extension_mapping() {
        assert_eq!(normalize_extension(Path::new("/a/B.PNG")), "png");
        assert_eq!(normalize_extension(Path::new("/a/noext")), "");
        assert_eq!(file_type_for_extension("docx"), FileType::Word);
        assert_eq!(file_type_for_extension("csv"), FileType::Excel);
        assert_eq!(file_type_for_extension("7z"), FileType::Archive);
        assert_eq!(file_type_for_extension(""), FileType::Unknown);
        assert_eq!(file_type_for_extension("exe"), FileType::Unknown);
    }

    #[test]
    fn test_png_header() {
        let dir = TempDir::new().unwrap();
        let good = write(&dir, "good.png", &png_bytes());
        let mut corrupt = png_bytes();
        corrupt[1] = b'X';
        let bad = write(&dir, "bad.png", &corrupt);

        assert_eq!(classify(&good, true).verdict, Ok(()));
        let result = classify(&bad, true);
        assert_eq!(result.file_type, FileType::Image);
        assert!(result.verdict.is_err());
    }

    #[test]
    fn test_validation_disabled_accepts_anything() {
        let dir = TempDir::new().unwrap();
        let bad = write(&dir, "bad.pdf", b"garbage");
        let result = classify(&bad, false);
        assert_eq!(result.file_type, FileType::Pdf);
        assert_eq!(result.verdict, Ok(()));
    }

    #[test]
    fn test_empty_and_missing_files() {
        let dir = TempDir::new().unwrap();
        let empty = write(&dir, "empty.txt", b"");
        assert_eq!(classify(&empty, true).verdict, Err("文件为空".to_string()));

        let missing = dir.path().join("gone.pdf");
        let verdict = classify(&missing, true).verdict;
        assert!(verdict.unwrap_err().starts_with("无法打开文件"));
    }

    #[test]
    fn test_pdf_requires_eof_marker() {
        let dir = TempDir::new().unwrap();
        let good = write(&dir, "ok.pdf", b"%PDF-1.4\n1 0 obj\n<<>>\nendobj\n%%EOF\n");
        let truncated = write(&dir, "cut.pdf", b"%PDF-1.4\n1 0 obj\n<<>>\nendobj\n");
        assert_eq!(classify(&good, true).verdict, Ok(()));
        assert!(classify(&truncated, true)
            .verdict
            .unwrap_err()
            .contains("EOF"));
    }

    #[test]
    fn test_office_formats() {
        let dir = TempDir::new().unwrap();
        let mut docx = ZIP_MAGIC.to_vec();
        docx.extend_from_slice(b"....[Content_Types].xml....word/document.xml");
        let docx = write(&dir, "a.docx", &docx);
        assert_eq!(classify(&docx, true).verdict, Ok(()));

        let mut doc = OLE_MAGIC.to_vec();
        doc.resize(2048, 0);
        doc[30] = 9;
        let doc = write(&dir, "a.doc", &doc);
        assert_eq!(classify(&doc, true).verdict, Ok(()));

        let csv = write(&dir, "a.csv", b"name,size\nfoo,1\nbar,2\n");
        assert_eq!(classify(&csv, true).verdict, Ok(()));

        let fake = write(&dir, "fake.xlsx", &[0u8, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(classify(&fake, true).verdict.is_err());
    }

    #[test]
    fn test_zip_needs_central_directory() {
        let dir = TempDir::new().unwrap();
        let mut whole = ZIP_MAGIC.to_vec();
        whole.extend_from_slice(&[0u8; 64]);
        whole.extend_from_slice(ZIP_EMPTY_MAGIC);
        whole.extend_from_slice(&[0u8; 18]);
        let whole = write(&dir, "ok.zip", &whole);
        assert_eq!(classify(&whole, true).verdict, Ok(()));

        let mut cut = ZIP_MAGIC.to_vec();
        cut.extend_from_slice(&[0u8; 64]);
        let cut = write(&dir, "cut.zip", &cut);
        assert!(classify(&cut, true).verdict.is_err());
    }
}
