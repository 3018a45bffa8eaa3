use crate::project::solidity::DEFAULT_PRAGMA;

#[derive(Debug, Clone)]
pub struct LlmPrompt {
    pub system: String,
    pub user: String,
}

impl LlmPrompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.system) + estimate_tokens(&self.user)
    }
}

/// What a generation prompt knows about one contract.
#[derive(Debug, Clone)]
pub struct ContractContext {
    pub filename: String,
    pub code: String,
    pub pragma: String,
    pub contract_name: String,
    pub references: String,
    pub custom_invariant: Option<String>,
}

/* ============================================================
   Token budget
   ============================================================ */

/// Rough token count, four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

/// Prompt size ceiling for a model family.
pub fn token_threshold(model: &str) -> usize {
    let m = model.to_ascii_lowercase();
    if m.contains("gpt-3.5") {
        8_000
    } else if m.contains("gemini-1.0") {
        280_000
    } else if m.contains("gemini-1.5") {
        1_000_000
    } else if m.contains("gpt-4") || m.contains("gpt-5") {
        120_000
    } else if m.contains("claude") {
        180_000
    } else {
        10_000
    }
}

/// Drops leading text in 1000-character steps until the estimate fits.
pub fn trim_to_threshold(text: &str, threshold: usize) -> String {
    let mut s = text;
    while estimate_tokens(s) > threshold && !s.is_empty() {
        let cut = s
            .char_indices()
            .nth(1000)
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        s = &s[cut..];
    }
    s.to_string()
}

/* ============================================================
   Generation prompts
   ============================================================ */

const GENERATION_SYSTEM: &str = "You are an expert smart contract auditor who writes Foundry test contracts in Solidity.\n\
Output only Solidity code for a single, complete test file.";

/// Skeleton the generated test file must follow.
pub fn test_contract_format(
    pragma: &str,
    contract_name: &str,
    source_filename: &str,
    contracts_rel: &str,
) -> String {
    let pragma = if pragma.trim().is_empty() {
        DEFAULT_PRAGMA
    } else {
        pragma.trim()
    };
    let import_dir = match contracts_rel.trim_matches('/') {
        "" => "..".to_string(),
        rel => format!("../{rel}"),
    };

    format!(
        "// SPDX-License-Identifier: UNLICENSED\n\
         pragma solidity {pragma};\n\
         pragma abicoder v2;\n\
         import {{Test, console2}} from \"forge-std/Test.sol\";\n\
         import \"{import_dir}/{source_filename}\";\n\
         contract {contract_name}Test is Test {{\n\
         // all the foundry test function and fuzz invariants\n\
         }}\n"
    )
}

fn references_section(references: &str) -> String {
    if references.trim().is_empty() {
        String::new()
    } else {
        format!("Here are the references of the input smart contract:\n{references}")
    }
}

fn custom_section(ctx: &ContractContext) -> String {
    match &ctx.custom_invariant {
        Some(desc) if !desc.trim().is_empty() => format!(
            "\nAlso write custom test invariants with the following details:\n{}\n\n",
            desc.trim()
        ),
        _ => String::new(),
    }
}

pub fn zero_shot(ctx: &ContractContext, contracts_rel: &str) -> LlmPrompt {
    let user = format!(
        "I have given you a smart contract. Write a Foundry test contract for it.\n\
         The test contract should cover all the edge cases that maximize the probability of finding vulnerabilities.\n\
         Give me only code as output.\n\n\
         Given input contract:\n{}\n{}\n{}\
         Test Contract Format:\n{}",
        ctx.code,
        references_section(&ctx.references),
        custom_section(ctx),
        test_contract_format(&ctx.pragma, &ctx.contract_name, &ctx.filename, contracts_rel),
    );

    LlmPrompt::new(GENERATION_SYSTEM, user)
}

/// Chain step 1: explain what the contract does.
pub fn chain_functionalities(ctx: &ContractContext) -> LlmPrompt {
    let user = format!(
        "Your task is to list down and explain all the functionalities of the given smart contract, each in detail.\n\
         Here is the input smart contract:\n{}\n{}",
        ctx.code,
        references_section(&ctx.references),
    );

    LlmPrompt::new("You are an expert smart contract auditor.", user)
}

/// Chain step 2: derive test invariants from the explanation.
pub fn chain_invariants(ctx: &ContractContext, functionalities: &str) -> LlmPrompt {
    let user = format!(
        "Your task is to list all the test invariants for a Foundry test contract that can be derived from the given smart contract. \
         Each invariant should cover specific edge cases.\n\
         Make sure to write test invariants for all the functionalities of the given contract.\n\
         Here is the input smart contract:\n{}\n{}\n\
         Explanation of the input smart contract:\n{}",
        ctx.code,
        references_section(&ctx.references),
        functionalities,
    );

    LlmPrompt::new("You are an expert smart contract auditor.", user)
}

/// Chain step 3: write the test contract for the invariant list.
pub fn chain_test_contract(ctx: &ContractContext, contracts_rel: &str, invariants: &str) -> LlmPrompt {
    let user = format!(
        "Write a Foundry test contract for the given contract based on the provided test invariants list.\n\
         Give me only code as output; the code must fully implement every test invariant.\n\
         Here is the input smart contract:\n{}\n{}\n{}\
         Here is the output test contract format:\n{}\n\
         The following is the list of test properties you have to write for the given contract:\n{}",
        ctx.code,
        references_section(&ctx.references),
        custom_section(ctx),
        test_contract_format(&ctx.pragma, &ctx.contract_name, &ctx.filename, contracts_rel),
        invariants,
    );

    LlmPrompt::new(GENERATION_SYSTEM, user)
}

/* ============================================================
   Repair prompts
   ============================================================ */

const REPAIR_SYSTEM: &str = "You are the world's best Solidity compilation error resolver.\n\
The input contract and its references are read-only context. Only the test contract may change.\n\
Always answer with the complete replacement test file in a single ```solidity block.";

const AGENT_SYSTEM: &str = "You are the world's best Solidity compilation error resolver.\n\
The input contract and its references are read-only context. Only the test contract may change.\n\
Use the compile_test_contract tool with the full text of the test file to compile it. \
The tool writes the file and returns the compiler output. \
Keep fixing and compiling until the output shows no errors, then reply with a short summary.";

fn repair_context(source: &str, references: &str, test_content: &str) -> String {
    let mut out = String::new();

    out.push_str("Test contract:\n```solidity\n");
    out.push_str(test_content.trim_end());
    out.push_str("\n```\n\n");

    if !references.trim().is_empty() {
        out.push_str("References for input contract:\n```solidity\n");
        out.push_str(references.trim_end());
        out.push_str("\n```\n\n");
    }

    out.push_str("Input contract:\n```solidity\n");
    out.push_str(source.trim_end());
    out.push_str("\n```\n");
    out
}

/// One directed repair round: the failing file plus the compiler report.
pub fn repair(source: &str, references: &str, test_content: &str, report: &str) -> LlmPrompt {
    let mut user = String::from(
        "My test contract does not compile. Make it compile while preserving its test logic. \
         You may remove invalid parts and import contracts from the ../src/ folder.\n\n",
    );
    user.push_str(&repair_context(source, references, test_content));
    user.push_str("\nCompiler output:\n```\n");
    user.push_str(report.trim_end());
    user.push_str("\n```\n");

    LlmPrompt::new(REPAIR_SYSTEM, user)
}

/// Opening message of the tool-driven repair conversation.
pub fn agent_repair(source: &str, references: &str, test_content: &str) -> LlmPrompt {
    let mut user = String::from(
        "I have created a test contract for the given input contract. It has compilation errors. \
         Make it an executable test contract by removing the errors, preserving its test logic. \
         You may import contracts from the ../src/ folder.\n\n",
    );
    user.push_str(&repair_context(source, references, test_content));

    LlmPrompt::new(AGENT_SYSTEM, user)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ContractContext {
        ContractContext {
            filename: "Vault.sol".into(),
            code: "contract Vault {}".into(),
            pragma: "^0.8.20".into(),
            contract_name: "Vault".into(),
            references: String::new(),
            custom_invariant: Some("withdraw never exceeds balance".into()),
        }
    }

    #[test]
    fn format_imports_the_contract_under_test() {
        let f = test_contract_format("", "Vault", "Vault.sol", "src/");
        assert!(f.contains("pragma solidity ^0.8.0;"));
        assert!(f.contains("import \"../src/Vault.sol\";"));
        assert!(f.contains("contract VaultTest is Test {"));
    }

    #[test]
    fn zero_shot_carries_code_format_and_custom_invariants() {
        let p = zero_shot(&ctx(), "src");
        assert!(p.user.contains("contract Vault {}"));
        assert!(p.user.contains("pragma solidity ^0.8.20;"));
        assert!(p.user.contains("withdraw never exceeds balance"));
        assert!(!p.user.contains("references of the input"));
    }

    #[test]
    fn repair_prompt_includes_the_report() {
        let p = repair("contract Foo {}", "", "contract FooTest {", "Error (2314): Expected '}'");
        assert!(p.user.contains("Error (2314)"));
        assert!(p.user.contains("contract FooTest {"));
        assert!(p.user.contains("Input contract:"));
        assert!(!p.user.contains("References for input contract"));
    }

    #[test]
    fn trimming_drops_leading_text_until_it_fits() {
        let text = "a".repeat(10_000);
        let trimmed = trim_to_threshold(&text, 1_000);
        assert_eq!(trimmed.len(), 4_000);
        assert_eq!(trim_to_threshold("short", 1_000), "short");
    }

    #[test]
    fn thresholds_follow_model_families() {
        assert_eq!(token_threshold("gpt-3.5-turbo-0125"), 8_000);
        assert_eq!(token_threshold("gpt-4o"), 120_000);
        assert_eq!(token_threshold("gemini-1.5-pro-latest"), 1_000_000);
        assert_eq!(token_threshold("mystery"), 10_000);
    }
}
