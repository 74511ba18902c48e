//! package.json 清单与依赖集合

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// package.json 中本系统关心的字段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PackageManifest {
    pub dependencies: BTreeMap<String, String>,
    pub dev_dependencies: BTreeMap<String, String>,
    pub scripts: BTreeMap<String, String>,
    pub homepage: Option<String>,
}

impl PackageManifest {
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }

    /// 合并运行时依赖与开发依赖（同名时开发依赖覆盖）
    pub fn dependency_set(&self) -> DependencySet {
        let mut merged = self.dependencies.clone();
        merged.extend(
            self.dev_dependencies
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        DependencySet(merged)
    }

    pub fn has_script(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }
}

/// 依赖名 → 版本范围
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet(pub BTreeMap<String, String>);

/// 单个依赖相对 master 的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyStatus {
    /// master 已满足
    Satisfied,
    /// master 中没有
    Missing,
    /// 主版本号不同
    MajorMismatch { master: u64, wanted: u64 },
}

impl DependencyStatus {
    pub fn needs_install(&self) -> bool {
        !matches!(self, DependencyStatus::Satisfied)
    }
}

/// 需要安装到 master 的依赖
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInstall {
    pub name: String,
    pub version: String,
    pub status: DependencyStatus,
}

impl PendingInstall {
    /// `npm install` 使用的 `name@version`，去掉 ^ 和 ~
    pub fn install_spec(&self) -> String {
        let clean = strip_range_operators(&self.version);
        if clean.is_empty() {
            self.name.clone()
        } else {
            format!("{}@{}", self.name, clean)
        }
    }
}

impl DependencySet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 判断单个依赖相对 master 的状态
    pub fn classify(&self, name: &str, master: &DependencySet) -> DependencyStatus {
        let Some(wanted) = self.0.get(name) else {
            return DependencyStatus::Satisfied;
        };
        let Some(have) = master.0.get(name) else {
            return DependencyStatus::Missing;
        };
        match (major_version(wanted), major_version(have)) {
            (Some(wanted), Some(master)) if wanted != master => {
                DependencyStatus::MajorMismatch { master, wanted }
            }
            _ => DependencyStatus::Satisfied,
        }
    }

    /// 列出所有需要安装（缺失或主版本不符）的依赖
    pub fn pending_against(&self, master: &DependencySet) -> Vec<PendingInstall> {
        self.0
            .iter()
            .filter_map(|(name, version)| {
                let status = self.classify(name, master);
                status.needs_install().then(|| PendingInstall {
                    name: name.clone(),
                    version: version.clone(),
                    status,
                })
            })
            .collect()
    }
}

fn strip_range_operators(version: &str) -> String {
    version.replace(['^', '~'], "").trim().to_string()
}

/// 版本范围的主版本号（首个数字段）；无法识别时返回 None
pub fn major_version(range: &str) -> Option<u64> {
    static MAJOR: OnceLock<Regex> = OnceLock::new();
    let re = MAJOR.get_or_init(|| Regex::new(r"^[\^~=v\s]*(\d+)").expect("valid regex"));
    re.captures(range.trim())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pairs: &[(&str, &str)]) -> DependencySet {
        DependencySet(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_major_version_parsing() {
        assert_eq!(major_version("^18.2.0"), Some(18));
        assert_eq!(major_version("~5.1"), Some(5));
        assert_eq!(major_version("6"), Some(6));
        assert_eq!(major_version("v4.0.0"), Some(4));
        assert_eq!(major_version("latest"), None);
        assert_eq!(major_version(">=1.0.0"), None);
    }

    #[test]
    fn test_classify_missing_and_mismatch() {
        let master = set(&[("react", "^18.2.0"), ("react-router-dom", "^6.4.0")]);
        let student = set(&[
            ("react", "^18.3.1"),
            ("react-router-dom", "^5.3.0"),
            ("js-cookie", "^3.0.5"),
        ]);

        assert_eq!(student.classify("react", &master), DependencyStatus::Satisfied);
        assert_eq!(
            student.classify("react-router-dom", &master),
            DependencyStatus::MajorMismatch {
                master: 6,
                wanted: 5
            }
        );
        assert_eq!(student.classify("js-cookie", &master), DependencyStatus::Missing);
    }

    #[test]
    fn test_minor_and_patch_differences_are_satisfied() {
        let master = set(&[("axios", "1.2.0")]);
        let student = set(&[("axios", "~1.6.7")]);
        assert!(student.pending_against(&master).is_empty());
    }

    #[test]
    fn test_non_numeric_ranges_are_not_mismatched() {
        let master = set(&[("typescript", "^5.0.0")]);
        let student = set(&[("typescript", "latest")]);
        assert_eq!(
            student.classify("typescript", &master),
            DependencyStatus::Satisfied
        );
    }

    #[test]
    fn test_pending_install_specs() {
        let master = set(&[("react-router-dom", "^6.4.0")]);
        let student = set(&[("react-router-dom", "^5.3.0"), ("js-cookie", "~3.0.5")]);
        let specs: Vec<String> = student
            .pending_against(&master)
            .iter()
            .map(PendingInstall::install_spec)
            .collect();
        assert_eq!(specs, vec!["js-cookie@3.0.5", "react-router-dom@5.3.0"]);
    }

    #[test]
    fn test_manifest_merges_dev_dependencies() {
        let manifest = PackageManifest::from_json(
            r#"{
                "name": "todo-app",
                "dependencies": { "react": "^18.2.0" },
                "devDependencies": { "vite": "^5.0.0", "react": "^18.3.0" },
                "scripts": { "dev": "vite" },
                "homepage": "/todo/"
            }"#,
        )
        .unwrap();

        let deps = manifest.dependency_set();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps.0["react"], "^18.3.0");
        assert!(manifest.has_script("dev"));
        assert_eq!(manifest.homepage.as_deref(), Some("/todo/"));
    }
}
