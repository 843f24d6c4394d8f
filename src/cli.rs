use std::str::FromStr;

use anyhow::{anyhow, Result};

use crate::studio::types::{CharacterDesign, CharacterStyle};

pub const DEFAULT_OWNER_ID: i64 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct CreateArgs {
    pub name: String,
    pub design: CharacterDesign,
    /// 1-based index into the generated concepts.
    pub pick: usize,
    pub concepts_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainArgs {
    pub name: String,
    pub description: String,
    pub images: Vec<String>,
    pub base_model: Option<String>,
    pub character_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdoptArgs {
    pub image: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Create(CreateArgs),
    Train(TrainArgs),
    Adopt(AdoptArgs),
    Gallery { character_id: Option<i64> },
    Status { job_id: String },
    Resume,
    Help,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub action: Action,
    pub owner_id: i64,
    /// Keep everything in memory instead of the configured database.
    pub memory: bool,
}

pub fn usage() -> &'static str {
    "Usage: character_studio <command> [options]\n\
     \n\
     Commands:\n\
     \x20 create  --name <name> [--style realistic|anime|art] [--body <type>] [--feature <text>]...\n\
     \x20         [--hair <style>] [--distinctive <text>]... [--aesthetic <style>] [--prompt <text>]\n\
     \x20         [--pick <1-4>] [--concepts-only]\n\
     \x20 train   --name <name> --image <url>... [--description <text>] [--base-model sdxl|sd15]\n\
     \x20         [--character <id>]\n\
     \x20 adopt   --image <url> [--name <name>] [--description <text>]\n\
     \x20 gallery [--id <character-id>]\n\
     \x20 status  <job-id>\n\
     \x20 resume\n\
     \x20 help\n\
     \n\
     Global options: --owner <id> (default 1), --memory"
}

struct ArgCursor<'a> {
    args: &'a [String],
    index: usize,
}

impl<'a> ArgCursor<'a> {
    fn next(&mut self) -> Option<&'a str> {
        let value = self.args.get(self.index).map(String::as_str);
        self.index += 1;
        value
    }

    fn value(&mut self, flag: &str) -> Result<&'a str> {
        self.next()
            .ok_or_else(|| anyhow!("Missing value for {flag}"))
    }

    fn parsed<T: FromStr>(&mut self, flag: &str) -> Result<T> {
        let value = self.value(flag)?;
        value
            .parse::<T>()
            .map_err(|_| anyhow!("Invalid {flag} value: {value}"))
    }
}

/// Parses `std::env::args()`; the first element is the program name.
pub fn parse_args(args: &[String]) -> Result<Invocation> {
    let Some(command) = args.get(1).map(String::as_str) else {
        return Ok(Invocation {
            action: Action::Help,
            owner_id: DEFAULT_OWNER_ID,
            memory: false,
        });
    };

    let mut cursor = ArgCursor { args, index: 2 };
    let mut owner_id = DEFAULT_OWNER_ID;
    let mut memory = false;

    let mut name: Option<String> = None;
    let mut description = String::new();
    let mut images: Vec<String> = Vec::new();
    let mut base_model: Option<String> = None;
    let mut character_id: Option<i64> = None;
    let mut design = CharacterDesign::default();
    let mut pick = 1usize;
    let mut concepts_only = false;
    let mut positional: Vec<String> = Vec::new();

    while let Some(arg) = cursor.next() {
        match arg {
            "--owner" => owner_id = cursor.parsed("--owner")?,
            "--memory" => memory = true,
            "--name" => name = Some(cursor.value("--name")?.to_string()),
            "--description" => description = cursor.value("--description")?.to_string(),
            "--image" => images.push(cursor.value("--image")?.to_string()),
            "--base-model" => base_model = Some(cursor.value("--base-model")?.to_lowercase()),
            "--character" | "--id" => character_id = Some(cursor.parsed(arg)?),
            "--style" => {
                design.style = cursor
                    .parsed::<CharacterStyle>("--style")
                    .map_err(|_| anyhow!("--style must be realistic, anime or art"))?;
            }
            "--body" => design.body_type = cursor.value("--body")?.to_string(),
            "--feature" => design.features.push(cursor.value("--feature")?.to_string()),
            "--hair" => design.hair_style = cursor.value("--hair")?.to_string(),
            "--distinctive" => {
                let feature = cursor.value("--distinctive")?;
                design.toggle_distinctive_feature(feature);
            }
            "--aesthetic" => design.aesthetic_style = cursor.value("--aesthetic")?.to_string(),
            "--prompt" => design.custom_prompt = cursor.value("--prompt")?.to_string(),
            "--pick" => pick = cursor.parsed("--pick")?,
            "--concepts-only" => concepts_only = true,
            "--help" | "-h" => {
                return Ok(Invocation {
                    action: Action::Help,
                    owner_id,
                    memory,
                })
            }
            other if other.starts_with("--") => {
                return Err(anyhow!("Unknown {command} argument: {other}"));
            }
            other => positional.push(other.to_string()),
        }
    }

    if let Some(base_model) = base_model.as_deref() {
        if !matches!(base_model, "sdxl" | "sd15") {
            return Err(anyhow!("--base-model must be sdxl or sd15"));
        }
    }

    let action = match command {
        "create" => {
            let name = name.ok_or_else(|| anyhow!("--name is required"))?;
            if !(1..=4).contains(&pick) {
                return Err(anyhow!("--pick must be between 1 and 4"));
            }
            Action::Create(CreateArgs {
                name,
                design,
                pick,
                concepts_only,
            })
        }
        "train" => Action::Train(TrainArgs {
            name: name.ok_or_else(|| anyhow!("--name is required"))?,
            description,
            images,
            base_model,
            character_id,
        }),
        "adopt" => {
            let mut images = images.into_iter();
            let image = images
                .next()
                .ok_or_else(|| anyhow!("--image is required"))?;
            if images.next().is_some() {
                return Err(anyhow!("adopt takes a single --image"));
            }
            Action::Adopt(AdoptArgs {
                image,
                name: name.unwrap_or_default(),
                description,
            })
        }
        "gallery" => Action::Gallery { character_id },
        "status" => {
            let job_id = positional
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("status needs a job id"))?;
            Action::Status { job_id }
        }
        "resume" => Action::Resume,
        "help" => Action::Help,
        other => return Err(anyhow!("Unknown command: {other}")),
    };

    Ok(Invocation {
        action,
        owner_id,
        memory,
    })
}
