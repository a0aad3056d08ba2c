use crate::models::{ElectiveMapping, Student, Subject};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 教务导入的参考数据
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReferenceData {
    #[serde(default)]
    pub students: Vec<Student>,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    /// 顺序即匹配优先级
    #[serde(default)]
    pub electives: Vec<ElectiveMapping>,
}

impl ReferenceData {
    fn merge(&mut self, other: ReferenceData) {
        self.students.extend(other.students);
        self.subjects.extend(other.subjects);
        self.electives.extend(other.electives);
    }
}

/// 从 TOML 文件加载参考数据
pub async fn load_reference_data(toml_file_path: &Path) -> Result<ReferenceData> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .with_context(|| format!("无法读取TOML文件: {}", toml_file_path.display()))?;

    let data: ReferenceData = toml::from_str(&content)
        .with_context(|| format!("无法解析TOML文件: {}", toml_file_path.display()))?;

    Ok(data)
}

/// 从文件夹中加载所有 TOML 文件并合并
///
/// 文件按文件名排序后合并，选修课规则的先后顺序因此是确定的。
pub async fn load_all_toml_files(folder_path: &str) -> Result<ReferenceData> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut toml_files = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml_files.push(path);
        }
    }
    toml_files.sort();

    let mut merged = ReferenceData::default();
    for path in toml_files {
        tracing::info!(
            "正在加载: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );

        match load_reference_data(&path).await {
            Ok(data) => {
                tracing::info!(
                    "成功加载 {} 名学生, {} 门课程, {} 条选修规则",
                    data.students.len(),
                    data.subjects.len(),
                    data.electives.len()
                );
                merged.merge(data);
            }
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {}", path.display(), e);
            }
        }
    }

    Ok(merged)
}
