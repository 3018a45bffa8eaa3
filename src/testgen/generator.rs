//! generator.rs
//!
//! First-draft test generation. Each selected contract gets its own pipeline
//! (one prompt for zero-shot, three chained prompts otherwise); pipelines run
//! on the bounded pool. The extracted code lands in `X.t.sol`, where the
//! repair loop picks it up.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::executor::pool::run_bounded;
use crate::llm::backend::LlmBackend;
use crate::llm::extract::extract_code;
use crate::llm::prompt::{self, estimate_tokens, token_threshold, trim_to_threshold, ContractContext, LlmPrompt};
use crate::logger::Logger;
use crate::project::layout::ProjectLayout;
use crate::project::references::{resolve_references, ReferenceResolution};
use crate::project::solidity::{self, DEFAULT_PRAGMA};
use crate::project::source::SourceUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Technique {
    #[default]
    ZeroShot,
    /// functionalities -> invariant list -> test contract
    Chain,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedTest {
    pub name: String,
    pub test_path: PathBuf,
    /// Intermediate chain answers (`X1.txt`, `X2.txt`).
    pub notes: Vec<PathBuf>,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

pub struct Generator {
    layout: ProjectLayout,
    llm: Arc<dyn LlmBackend>,
    technique: Technique,
    model: String,
    request_timeout: Duration,
    workers: usize,
    log: Logger,
}

impl Generator {
    pub fn new(
        layout: ProjectLayout,
        llm: Arc<dyn LlmBackend>,
        technique: Technique,
        model: impl Into<String>,
        request_timeout: Duration,
        workers: usize,
        log: Logger,
    ) -> Self {
        Self {
            layout,
            llm,
            technique,
            model: model.into(),
            request_timeout,
            workers,
            log,
        }
    }

    /// Everything the prompts need to know about one contract.
    pub fn context(&self, unit: &SourceUnit, custom_invariant: Option<&str>) -> ContractContext {
        let log = self.log.scoped(unit.stem());

        let references = match resolve_references(unit) {
            ReferenceResolution::Unparsed(e) => {
                log.warn(format!("imports not parsed: {e}"));
                String::new()
            }
            resolved => {
                if resolved.count() > 0 {
                    log.info(format!("{} reference(s) inlined", resolved.count()));
                }
                resolved.context_text()
            }
        };

        ContractContext {
            filename: unit.filename.clone(),
            pragma: solidity::pragma_version(&unit.code).unwrap_or_else(|| DEFAULT_PRAGMA.into()),
            contract_name: solidity::primary_name(&unit.code).unwrap_or_else(|| unit.stem().into()),
            code: unit.code.clone(),
            references,
            custom_invariant: custom_invariant.map(str::to_owned),
        }
    }

    /// Generates a test for each unit. `custom` maps source filenames to extra
    /// invariant descriptions. Results arrive in completion order.
    pub fn generate_all(
        &self,
        units: &[SourceUnit],
        custom: &HashMap<String, String>,
    ) -> Vec<(String, Result<GeneratedTest, String>)> {
        let jobs = units
            .iter()
            .map(|u| {
                let ctx = self.context(u, custom.get(&u.filename).map(String::as_str));
                (u.stem().to_string(), ctx)
            })
            .collect();

        let done = run_bounded(jobs, self.workers, |ctx: ContractContext| self.generate_one(&ctx));

        let (mut input, mut output) = (0, 0);
        let results: Vec<_> = done
            .into_iter()
            .map(|c| {
                let result = c.result.and_then(|r| r);
                match &result {
                    Ok(t) => {
                        input += t.input_tokens;
                        output += t.output_tokens;
                        self.log.scoped(&c.label).success(format!("wrote {}", t.test_path.display()));
                    }
                    Err(e) => self.log.scoped(&c.label).error(format!("generation failed: {e}")),
                }
                (c.label, result)
            })
            .collect();

        self.log
            .info(format!("total input tokens ~{input}, output tokens ~{output}"));
        results
    }

    pub fn generate_one(&self, ctx: &ContractContext) -> Result<GeneratedTest, String> {
        let paths = self.layout.candidate(&ctx.filename);
        let rel = &self.layout.contracts_rel;
        let mut input_tokens = 0;
        let mut notes = Vec::new();

        let answer = match self.technique {
            Technique::ZeroShot => self.ask(prompt::zero_shot(ctx, rel), &mut input_tokens)?,
            Technique::Chain => {
                let functionalities =
                    self.ask(prompt::chain_functionalities(ctx), &mut input_tokens)?;
                notes.push(self.write_note(&paths.name, 1, &functionalities)?);

                let invariants =
                    self.ask(prompt::chain_invariants(ctx, &functionalities), &mut input_tokens)?;
                notes.push(self.write_note(&paths.name, 2, &invariants)?);

                self.ask(prompt::chain_test_contract(ctx, rel, &invariants), &mut input_tokens)?
            }
        };

        let code = extract_code(&answer);
        fs::create_dir_all(&self.layout.test_dir).map_err(|e| e.to_string())?;
        fs::write(&paths.test, &code).map_err(|e| format!("{}: {}", paths.test.display(), e))?;

        Ok(GeneratedTest {
            name: paths.name,
            test_path: paths.test,
            notes,
            input_tokens,
            output_tokens: estimate_tokens(&code),
        })
    }

    fn ask(&self, prompt: LlmPrompt, input_tokens: &mut usize) -> Result<String, String> {
        let prompt = self.fit(prompt);
        *input_tokens += prompt.estimated_tokens();
        let result = self.llm.run(&prompt, self.request_timeout)?;
        if let Some(cached) = result.cached_tokens.filter(|&c| c > 0) {
            self.log.info(format!(
                "prompt {}: {} cached token(s)",
                &result.prompt_hash[..result.prompt_hash.len().min(12)],
                cached
            ));
        }
        Ok(result.text)
    }

    /// Trims the user text from the front until the model's threshold is met.
    fn fit(&self, mut prompt: LlmPrompt) -> LlmPrompt {
        let threshold = token_threshold(&self.model);
        if prompt.estimated_tokens() <= threshold {
            return prompt;
        }

        let room = threshold.saturating_sub(estimate_tokens(&prompt.system));
        self.log.warn(format!(
            "prompt of ~{} tokens exceeds {} for {}, trimming",
            prompt.estimated_tokens(),
            threshold,
            self.model
        ));
        prompt.user = trim_to_threshold(&prompt.user, room);
        prompt
    }

    fn write_note(&self, stem: &str, step: u8, text: &str) -> Result<PathBuf, String> {
        fs::create_dir_all(&self.layout.test_dir).map_err(|e| e.to_string())?;
        let path = self.layout.test_dir.join(format!("{stem}{step}.txt"));
        fs::write(&path, text).map_err(|e| format!("{}: {}", path.display(), e))?;
        Ok(path)
    }
}
