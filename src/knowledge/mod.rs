//! 教学法知识库：向量化存储与 Top-K 检索
//!
//! 流水线只依赖 KnowledgeBase trait；检索失败由调用方吞掉降级为空结果，
//! 这里不做重试。向量实现提供文档分块、嵌入与余弦相似度排序。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::llm::EmbeddingProvider;

/// 检索结果条目
#[derive(Debug, Clone)]
pub struct RetrievedDoc {
    pub content: String,
    pub name: String,
}

/// 检索接口：may fail，调用方必须 fail-soft
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<RetrievedDoc>, String>;
}

/// 固定文档集实现：无嵌入依赖，演示与测试用
#[derive(Debug, Default)]
pub struct StaticKnowledgeBase {
    docs: Vec<RetrievedDoc>,
}

impl StaticKnowledgeBase {
    pub fn new(docs: Vec<RetrievedDoc>) -> Self {
        Self { docs }
    }
}

#[async_trait]
impl KnowledgeBase for StaticKnowledgeBase {
    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<RetrievedDoc>, String> {
        Ok(self.docs.iter().take(max_results).cloned().collect())
    }
}

/// 目标分块大小（字符数）
const CHUNK_CHARS: usize = 500;

/// 把文档按段落聚合成不超过 CHUNK_CHARS 的块（UTF-8 安全）
fn chunk_text(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for para in text.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        if !current.is_empty() && current.chars().count() + para.chars().count() > CHUNK_CHARS {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(para);
        // 单段超长时按字符截断
        while current.chars().count() > CHUNK_CHARS {
            let head: String = current.chars().take(CHUNK_CHARS).collect();
            let rest: String = current.chars().skip(CHUNK_CHARS).collect();
            chunks.push(head);
            current = rest;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// 余弦相似度
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

struct Entry {
    name: String,
    text: String,
    embedding: Vec<f32>,
}

/// 向量知识库：嵌入 + 余弦 Top-K
pub struct VectorKnowledgeBase {
    embedder: Arc<dyn EmbeddingProvider>,
    entries: RwLock<Vec<Entry>>,
}

impl VectorKnowledgeBase {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// 索引一篇文档：分块、嵌入、替换同名旧版本
    pub async fn index_document(&self, name: &str, text: &str) -> Result<usize, String> {
        let chunks = chunk_text(text);
        let mut new_entries = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let embedding = self.embedder.embed(&chunk).await?;
            if embedding.is_empty() {
                continue;
            }
            new_entries.push(Entry {
                name: name.to_string(),
                text: chunk,
                embedding,
            });
        }
        let added = new_entries.len();
        let mut entries = self.entries.write().await;
        entries.retain(|e| e.name != name);
        entries.extend(new_entries);
        Ok(added)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KnowledgeBase for VectorKnowledgeBase {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<RetrievedDoc>, String> {
        let query_embedding = self.embedder.embed(query).await?;
        if query_embedding.is_empty() {
            return Ok(Vec::new());
        }
        let entries = self.entries.read().await;
        let mut scored: Vec<(f32, &Entry)> = entries
            .iter()
            .map(|e| (cosine_similarity(&query_embedding, &e.embedding), e))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(max_results)
            .map(|(_, e)| RetrievedDoc {
                content: e.text.clone(),
                name: e.name.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 以词频桶为向量的测试嵌入器
    struct BagEmbedder;

    #[async_trait]
    impl EmbeddingProvider for BagEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
            let mut v = vec![0.0f32; 16];
            for word in text.split_whitespace() {
                let mut h = 0usize;
                for b in word.bytes() {
                    h = h.wrapping_mul(31).wrapping_add(b as usize);
                }
                v[h % 16] += 1.0;
            }
            Ok(v)
        }
    }

    #[test]
    fn test_chunking_bounds() {
        let para = "word ".repeat(60);
        let text = format!("{}\n\n{}\n\n{}", para, para, para);
        let chunks = chunk_text(&text);
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.chars().count() <= CHUNK_CHARS);
        }
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.001);
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_index_and_search() {
        let kb = VectorKnowledgeBase::new(Arc::new(BagEmbedder));
        kb.index_document("pedagogy", "fractions need concrete materials and bar models")
            .await
            .unwrap();
        kb.index_document("algebra", "algebraic thinking uses symbols and generalisation")
            .await
            .unwrap();

        let results = kb.search("fractions bar models", 5).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].name, "pedagogy");
    }

    #[tokio::test]
    async fn test_reindex_replaces_old_version() {
        let kb = VectorKnowledgeBase::new(Arc::new(BagEmbedder));
        kb.index_document("doc", "old content").await.unwrap();
        kb.index_document("doc", "new content").await.unwrap();
        assert_eq!(kb.len().await, 1);
    }
}
