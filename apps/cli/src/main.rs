use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;

use netcraft_core_sdk::{
    gateway::ChatGateway,
    knowledge::KnowledgeCorpus,
    models::{ChatMessage, ChatRequest, LlmConfig},
    server, telemetry,
};

/**
 * \brief CLI 程序入口：本地起服务或在终端里直接对话。
 */
#[derive(Parser, Debug)]
#[command(name = "netcraft", version, about = "NetCraft AI chat gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 启动 HTTP 服务，暴露聊天网关。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: String,
        #[arg(long, default_value_t = false)]
        enable_telemetry: bool,
    },

    /**
     * \brief 发送一条用户消息并流式打印模型回复。
     */
    Chat {
        #[arg(long)]
        prompt: String,
        #[arg(long, default_value = "dashscope")]
        provider: String,
        #[arg(long, default_value = "qwen-turbo")]
        model: String,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
    },

    /**
     * \brief 打印知识库装载诊断信息。
     */
    Kb,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_from_env();

    match cli.command {
        Commands::Serve {
            addr,
            enable_telemetry,
        } => {
            if enable_telemetry {
                telemetry::set_enabled(true);
            }
            let corpus = KnowledgeCorpus::load_default();
            if corpus.is_empty() {
                println!("Warning: knowledge corpus is empty, answers will not be grounded");
            } else {
                println!(
                    "Loaded {} knowledge documents ({} bytes)",
                    corpus.len(),
                    corpus.total_bytes()
                );
            }
            let gateway = ChatGateway::from_env(&corpus);
            server::run(&addr, gateway).await.context("serve failed")?;
        }

        Commands::Chat {
            prompt,
            provider,
            model,
            api_key,
            base_url,
        } => {
            let corpus = KnowledgeCorpus::load_default();
            let gateway = ChatGateway::from_env(&corpus);
            let request = ChatRequest {
                messages: vec![ChatMessage {
                    role: "user".to_string(),
                    content: prompt,
                }],
                config: Some(LlmConfig {
                    provider,
                    model,
                    api_key,
                    base_url,
                }),
                api_key: None,
            };

            let mut stream = gateway.chat_stream(request);
            while let Some(item) = stream.next().await {
                print!("{}", item.into_wire_text());
                use std::io::Write;
                std::io::stdout().flush().ok();
            }
            println!();
        }

        Commands::Kb => {
            let corpus = KnowledgeCorpus::load_default();
            match corpus.source_dir() {
                Some(dir) => {
                    println!("Knowledge base: {}", dir.display());
                    println!(
                        "{} documents, {} bytes",
                        corpus.len(),
                        corpus.total_bytes()
                    );
                    for doc in corpus.documents() {
                        println!("  {} ({} bytes)", doc.filename, doc.content.len());
                    }
                }
                None => println!("Knowledge base: empty (no documents found)"),
            }
        }
    }

    Ok(())
}
