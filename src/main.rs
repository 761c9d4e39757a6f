//! 演示入口：从命令行读主题，跑一次完整生成并把事件打印为 JSON 行
//!
//! 设置 OPENAI_API_KEY 时走真实 OpenAI 兼容端点，否则用 Mock 客户端
//! 跑通全链路（适合本地验证事件流与审计落库）。

use std::sync::Arc;

use anyhow::Context;

use lessonforge::config::load_config;
use lessonforge::knowledge::{KnowledgeBase, RetrievedDoc, StaticKnowledgeBase, VectorKnowledgeBase};
use lessonforge::llm::{LlmClient, MockLlmClient, OpenAiClient, OpenAiEmbedder};
use lessonforge::pipeline::{EngineDeps, Pipeline};
use lessonforge::store::{
    AuditStore, MemoryCurriculumStore, MemoryTemplateStore, SqliteAuditStore,
    SqliteCurriculumStore, SqliteTemplateStore,
};
use lessonforge::{observability, GenerationParams};

fn demo_pedagogy_docs() -> Vec<RetrievedDoc> {
    vec![
        RetrievedDoc {
            content: "Worked examples reduce cognitive load when paired with faded scaffolding: \
                      model the full solution first, then remove steps gradually."
                .to_string(),
            name: "cognitive_load_notes".to_string(),
        },
        RetrievedDoc {
            content: "For fractions, move from area models to number lines before symbolic \
                      manipulation; bar models bridge the two representations."
                .to_string(),
            name: "fraction_progressions".to_string(),
        },
    ]
}

fn mock_clients() -> (Arc<dyn LlmClient>, Arc<dyn LlmClient>) {
    let fast = MockLlmClient::new().with_replies([
        r#"{"topic":"adding fractions with like denominators","year_level":"Year 5","strand":"Number","intent":"instruction","keywords":["fractions","denominators","addition"]}"#,
        r#"[{"code":"AC9M5N06","text":"Solve problems involving addition and subtraction of fractions with the same or related denominators","year_level":"MATMATY5","strand":"Number","confidence":"high","reason":"Directly covers fraction addition"}]"#,
    ]);
    let gen = MockLlmClient::new().with_reply(
        "# Adding Fractions: Worked Example Study\n\n\
         ## I Do\n1. Show 1/4 + 2/4 on a bar model.\n2. Add the numerators; the denominator stays.\n\n\
         ## We Do\nWork through 3/8 + 2/8 together, prompting for each step.\n\n\
         ## You Do\nSolve 2/5 + 1/5 and 3/10 + 4/10 independently, then check with a number line.",
    );
    (Arc::new(fast), Arc::new(gen))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("failed to load configuration")?;

    let topic = {
        let args: Vec<String> = std::env::args().skip(1).collect();
        if args.is_empty() {
            "adding fractions with like denominators".to_string()
        } else {
            args.join(" ")
        }
    };

    let use_openai = std::env::var("OPENAI_API_KEY").is_ok();
    let (fast_llm, gen_llm): (Arc<dyn LlmClient>, Arc<dyn LlmClient>) = if use_openai {
        let base_url = cfg.llm.base_url.as_deref();
        (
            Arc::new(OpenAiClient::new(base_url, &cfg.llm.fast_model, None)),
            Arc::new(OpenAiClient::new(base_url, &cfg.llm.generation_model, None)),
        )
    } else {
        tracing::info!("OPENAI_API_KEY not set, using mock LLM clients");
        mock_clients()
    };

    let knowledge: Arc<dyn KnowledgeBase> = if use_openai {
        let embedder = Arc::new(OpenAiEmbedder::new(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.embedding_model,
            None,
        ));
        let kb = VectorKnowledgeBase::new(embedder);
        for doc in demo_pedagogy_docs() {
            kb.index_document(&doc.name, &doc.content)
                .await
                .map_err(anyhow::Error::msg)
                .context("failed to index pedagogy document")?;
        }
        Arc::new(kb)
    } else {
        Arc::new(StaticKnowledgeBase::new(demo_pedagogy_docs()))
    };

    let db_path = cfg
        .db
        .path
        .clone()
        .unwrap_or_else(|| std::path::PathBuf::from("lessonforge.db"));
    let audit: Arc<dyn AuditStore> =
        Arc::new(SqliteAuditStore::open(&db_path).context("failed to open audit database")?);

    // 参考数据走同一个 SQLite 文件，启动时用演示语料播种（INSERT OR REPLACE，可重入）
    let curriculum =
        SqliteCurriculumStore::open(&db_path).context("failed to open curriculum database")?;
    curriculum
        .import(&MemoryCurriculumStore::demo())
        .context("failed to seed curriculum data")?;
    let templates =
        SqliteTemplateStore::open(&db_path).context("failed to open template database")?;
    for template in &MemoryTemplateStore::demo().templates {
        templates
            .insert(template)
            .context("failed to seed prompt template")?;
    }

    let deps = EngineDeps {
        fast_llm,
        gen_llm,
        curriculum: Arc::new(curriculum),
        templates: Arc::new(templates),
        knowledge,
        max_results: cfg.retrieval.max_results,
        preview_chars: cfg.retrieval.preview_chars,
    };
    let pipeline = Pipeline::new(deps, audit, cfg.stream.max_content_chars);

    let mut events = pipeline.generate(GenerationParams::new(topic));
    while let Some(event) = events.recv().await {
        println!("{}", serde_json::to_string(&event)?);
    }

    Ok(())
}
