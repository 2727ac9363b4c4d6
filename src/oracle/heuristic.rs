//! 启发式分析与路由：快速通道与 oracle 降级共用
//!
//! 关键词检测能力（英文按整词匹配，中文按子串匹配），正则识别算式；
//! 路由按能力匹配名单中的第一个 agent，无匹配则交给兜底 agent。

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::agents::{AgentRoster, ToolCatalog};
use crate::pipeline::{
    AnalysisResult, AnalysisStep, Complexity, ProposedAgent, RouteProposal, Task,
};

/// 能力按固定顺序检测，也决定了启发式步骤的先后（先查资料、再计算、最后成文）
const CAPABILITY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "web_search",
        &[
            "price", "latest", "news", "current", "today", "search", "lookup", "weather",
            "最新", "价格", "新闻", "搜索", "查询", "今天",
        ],
    ),
    (
        "computation",
        &[
            "calculate", "compute", "profit", "percent", "percentage", "sum", "total", "average",
            "计算", "利润", "多少", "百分比",
        ],
    ),
    (
        "analysis",
        &[
            "analyze", "analyse", "analysis", "explain", "why", "compare", "evaluate", "assess",
            "分析", "解释", "为什么", "比较", "评估", "推理",
        ],
    ),
    (
        "code",
        &[
            "code", "bug", "compile", "rust", "python", "javascript", "typescript", "implement",
            "refactor", "debug", "function", "struct", "trait",
            "代码", "编程", "函数", "写个程序",
        ],
    ),
    (
        "summarization",
        &[
            "summarize", "summarise", "summary", "tldr", "brief",
            "总结", "摘要", "概括", "简述",
        ],
    ),
    (
        "writing",
        &[
            "write", "draft", "essay", "article", "email", "letter", "blog",
            "撰写", "写一篇", "文章", "邮件",
        ],
    ),
];

fn arithmetic_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(\.\d+)?\s*[-+*/×÷^%]\s*\d+").ok())
        .as_ref()
}

fn step_description(capability: &str) -> &'static str {
    match capability {
        "web_search" => "Gather up-to-date information",
        "computation" => "Perform the required calculations",
        "analysis" => "Analyze the findings",
        "code" => "Write or fix the code",
        "summarization" => "Summarize the material",
        "writing" => "Write the final text",
        _ => "Answer the task directly",
    }
}

pub struct HeuristicAnalyzer;

impl HeuristicAnalyzer {
    /// 检测任务文本需要的能力（按 CAPABILITY_KEYWORDS 顺序，去重）
    pub fn detect_capabilities(text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        let words: HashSet<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
            .collect();

        let mut caps = Vec::new();
        for (capability, keywords) in CAPABILITY_KEYWORDS {
            let hit = keywords.iter().any(|k| {
                if k.is_ascii() {
                    words.contains(k)
                } else {
                    lower.contains(k)
                }
            });
            let arithmetic = *capability == "computation"
                && arithmetic_regex().is_some_and(|re| re.is_match(&lower));
            if hit || arithmetic {
                caps.push(capability.to_string());
            }
        }
        caps
    }

    /// 启发式分析；degraded 表示这是 oracle 失败后的降级结果
    pub fn analyze(task: &Task, degraded: bool) -> AnalysisResult {
        let capabilities = Self::detect_capabilities(&task.text);
        let words = task.word_count();
        let complexity = if capabilities.len() >= 3 || words > 80 {
            Complexity::High
        } else if capabilities.len() <= 1 && words <= 20 {
            Complexity::Low
        } else {
            Complexity::Medium
        };

        let steps = if capabilities.is_empty() {
            vec![AnalysisStep {
                description: step_description("").to_string(),
                capability: None,
                depends_on: vec![],
            }]
        } else {
            capabilities
                .iter()
                .enumerate()
                .map(|(i, cap)| AnalysisStep {
                    description: step_description(cap).to_string(),
                    capability: Some(cap.clone()),
                    depends_on: if i == 0 { vec![] } else { vec![i - 1] },
                })
                .collect()
        };

        AnalysisResult {
            complexity,
            needs_web_search: capabilities.iter().any(|c| c == "web_search"),
            capabilities,
            steps,
            degraded,
        }
    }

    /// 启发式路由：每个带能力的步骤找第一个匹配的 agent，串成一条依赖链
    pub fn route(
        task: &Task,
        analysis: &AnalysisResult,
        roster: &AgentRoster,
        tools: &ToolCatalog,
    ) -> RouteProposal {
        let mut agents: Vec<ProposedAgent> = Vec::new();
        for step in &analysis.steps {
            let Some(cap) = &step.capability else {
                continue;
            };
            let Some(profile) = roster.find_by_capability(cap) else {
                continue;
            };
            if let Some(existing) = agents.iter_mut().find(|a| a.name == profile.name) {
                for t in tools.tools_for_capability(cap) {
                    if !existing.tools.contains(&t.name) {
                        existing.tools.push(t.name.clone());
                    }
                }
                continue;
            }
            let depends_on = agents
                .last()
                .map(|prev| vec![prev.name.clone()])
                .unwrap_or_default();
            agents.push(ProposedAgent {
                name: profile.name.clone(),
                instruction: format!("{}\n\nFocus: {}", task.text, step.description),
                tools: tools
                    .tools_for_capability(cap)
                    .iter()
                    .map(|t| t.name.clone())
                    .collect(),
                depends_on,
            });
        }

        if agents.is_empty() {
            agents.push(ProposedAgent {
                name: roster.default_agent().to_string(),
                instruction: task.text.clone(),
                tools: vec![],
                depends_on: vec![],
            });
        }

        let strategy = if agents.len() == 1 { "delegated" } else { "sequential" };
        RouteProposal {
            agents,
            strategy: strategy.to_string(),
            rationale: "keyword heuristics".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_arithmetic() {
        assert_eq!(HeuristicAnalyzer::detect_capabilities("2+2"), vec!["computation"]);
        assert_eq!(HeuristicAnalyzer::detect_capabilities("3.5 * 4"), vec!["computation"]);
    }

    #[test]
    fn test_whole_word_matching() {
        // "good" 不应命中 code 关键词，"summary" 命中 summarization
        let caps = HeuristicAnalyzer::detect_capabilities("Give me a good summary");
        assert_eq!(caps, vec!["summarization"]);
    }

    #[test]
    fn test_btc_task_capabilities() {
        let task = Task::new(
            "Find the latest BTC price and calculate my profit if I bought 2 BTC at 30000",
        );
        let a = HeuristicAnalyzer::analyze(&task, false);
        assert_eq!(a.capabilities, vec!["web_search", "computation"]);
        assert!(a.needs_web_search);
        assert_eq!(a.steps[1].depends_on, vec![0]);
    }

    #[test]
    fn test_chinese_keywords() {
        let caps = HeuristicAnalyzer::detect_capabilities("帮我总结这篇文章");
        assert!(caps.contains(&"summarization".to_string()));
        assert!(caps.contains(&"writing".to_string()));
    }

    #[test]
    fn test_route_chains_agents() {
        let task = Task::new("Find the latest BTC price and calculate the profit");
        let analysis = HeuristicAnalyzer::analyze(&task, false);
        let p = HeuristicAnalyzer::route(
            &task,
            &analysis,
            &AgentRoster::builtin(),
            &ToolCatalog::builtin(),
        );
        let names: Vec<_> = p.agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Researcher", "Analyst"]);
        assert_eq!(p.strategy, "sequential");
        assert_eq!(p.agents[1].depends_on, vec!["Researcher"]);
        assert!(p.agents[0].tools.contains(&"web_search".to_string()));
    }

    #[test]
    fn test_route_falls_back_to_default_agent() {
        let task = Task::new("hello there");
        let analysis = HeuristicAnalyzer::analyze(&task, false);
        assert!(analysis.capabilities.is_empty());
        let p = HeuristicAnalyzer::route(
            &task,
            &analysis,
            &AgentRoster::builtin(),
            &ToolCatalog::builtin(),
        );
        assert_eq!(p.agents.len(), 1);
        assert_eq!(p.agents[0].name, "Generalist");
        assert_eq!(p.strategy, "delegated");
    }
}
