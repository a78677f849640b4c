use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::telemetry;

/** \brief 知识库目录覆盖环境变量。 */
pub const KB_DIR_ENV: &str = "NETCRAFT_KB_DIR";

/** \brief 开发布局下的知识库目录（相对工作目录）。 */
const DEV_KB_DIR: &str = "RAG/KnowledgeBase";

/** \brief 部署布局下的知识库目录。 */
const DEPLOY_KB_DIR: &str = "/usr/share/netcraft/KnowledgeBase";

/**
 * \brief 单篇知识文档，进程启动后不再变化。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeDocument {
    /** \brief 文件名，用于下游按文档名引用。 */
    pub filename: String,
    /** \brief 文档全文。 */
    pub content: String,
}

/**
 * \brief 只读知识库：启动时装载一次，随后以 Arc 共享。
 * \details 空知识库是合法状态，仅记录一条诊断日志；新增文档需要重启进程。
 */
#[derive(Debug, Clone, Default)]
pub struct KnowledgeCorpus {
    documents: Vec<KnowledgeDocument>,
    source_dir: Option<PathBuf>,
}

impl KnowledgeCorpus {
    /**
     * \brief 按约定顺序探测知识库目录并装载。
     * \details 依次尝试环境变量覆盖、开发布局、部署布局，取第一个含有
     * `*.md` 文档的目录；全部落空则返回空知识库。
     */
    pub fn load_default() -> Self {
        let mut candidates = Vec::new();
        if let Ok(dir) = std::env::var(KB_DIR_ENV) {
            if !dir.is_empty() {
                candidates.push(PathBuf::from(dir));
            }
        }
        candidates.push(PathBuf::from(DEV_KB_DIR));
        candidates.push(PathBuf::from(DEPLOY_KB_DIR));

        for dir in candidates {
            let corpus = Self::load_from_dir(&dir);
            if !corpus.is_empty() {
                telemetry::log_event(
                    "kb.load",
                    &format!(
                        "loaded {} documents ({} bytes) from {}",
                        corpus.len(),
                        corpus.total_bytes(),
                        dir.display()
                    ),
                );
                return corpus;
            }
        }

        telemetry::log_event("kb.load", "no knowledge documents found, corpus is empty");
        Self::default()
    }

    /**
     * \brief 装载指定目录下的全部 `*.md` 文档，按文件名升序。
     * \details 单个文档读取失败仅记录并跳过，不会中断装载。
     */
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let mut filenames: Vec<String> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().into_string().ok())
                .filter(|name| name.ends_with(".md"))
                .collect(),
            Err(_) => Vec::new(),
        };
        filenames.sort();

        let mut documents = Vec::with_capacity(filenames.len());
        for filename in filenames {
            match fs::read_to_string(dir.join(&filename)) {
                Ok(content) => documents.push(KnowledgeDocument { filename, content }),
                Err(err) => {
                    eprintln!("knowledge file {} skipped: {}", filename, err);
                    telemetry::log_error(
                        "kb.load",
                        &format!("read {} failed: {}", dir.join(&filename).display(), err),
                    );
                }
            }
        }

        let source_dir = if documents.is_empty() {
            None
        } else {
            Some(dir.to_path_buf())
        };
        Self {
            documents,
            source_dir,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn documents(&self) -> &[KnowledgeDocument] {
        &self.documents
    }

    /** \brief 实际装载来源目录；空知识库为 None。 */
    pub fn source_dir(&self) -> Option<&Path> {
        self.source_dir.as_deref()
    }

    /** \brief 全部文档正文的字节总量。 */
    pub fn total_bytes(&self) -> usize {
        self.documents.iter().map(|d| d.content.len()).sum()
    }

    /**
     * \brief 将全部文档按文件名升序拼接，每篇用 BEGIN/END 标记包裹。
     * \details 标记内写明文件名，使回答可以按文档名引用出处。
     */
    pub fn concatenated(&self) -> String {
        let mut out = String::new();
        for doc in &self.documents {
            out.push_str(&format!("\n\n--- BEGIN KNOWLEDGE: {} ---\n", doc.filename));
            out.push_str(&doc.content);
            out.push_str(&format!("\n--- END KNOWLEDGE: {} ---\n", doc.filename));
        }
        out
    }
}
