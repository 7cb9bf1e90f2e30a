use clap::Subcommand;
use rulevault_store::{ComponentUseRulePatch, NewComponentUseRule, StorageGateway, UseRuleQuery};
use serde_json::json;

use super::{PageArgs, print_json};

#[derive(Subcommand)]
pub enum UseRulesAction {
    List {
        #[arg(long = "type")]
        component_type: Option<String>,
        #[arg(long)]
        disabled: Option<bool>,
        /// Substring of the component name.
        #[arg(long)]
        keywords: Option<String>,
        #[command(flatten)]
        page: PageArgs,
    },
    Get { id: i64 },
    Create {
        #[arg(long)]
        name: String,
        #[arg(long = "type", default_value = "")]
        component_type: String,
        #[arg(long)]
        disabled: bool,
        #[arg(long, default_value = "")]
        use_desc: String,
        #[arg(long, default_value = "")]
        use_rule_desc: String,
    },
    /// Change only the fields that are passed.
    Update {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "type")]
        component_type: Option<String>,
        #[arg(long)]
        disabled: Option<bool>,
        #[arg(long)]
        use_desc: Option<String>,
        #[arg(long)]
        use_rule_desc: Option<String>,
    },
    Delete { id: i64 },
}

pub fn run(gateway: &StorageGateway, action: UseRulesAction) -> anyhow::Result<()> {
    let store = gateway.use_rules()?;
    match action {
        UseRulesAction::List {
            component_type,
            disabled,
            keywords,
            page,
        } => {
            let query = UseRuleQuery {
                component_type,
                disabled,
                keywords,
                pagination: page.into(),
            };
            print_json(&store.list(&query)?)
        }
        UseRulesAction::Get { id } => print_json(&store.get(id)?),
        UseRulesAction::Create {
            name,
            component_type,
            disabled,
            use_desc,
            use_rule_desc,
        } => print_json(&store.create(&NewComponentUseRule {
            component_name: name,
            component_type,
            disabled,
            use_desc,
            use_rule_desc,
        })?),
        UseRulesAction::Update {
            id,
            name,
            component_type,
            disabled,
            use_desc,
            use_rule_desc,
        } => {
            let patch = ComponentUseRulePatch {
                component_name: name,
                component_type,
                disabled,
                use_desc,
                use_rule_desc,
            };
            print_json(&store.update(id, &patch)?)
        }
        UseRulesAction::Delete { id } => {
            store.delete(id)?;
            print_json(&json!({ "deleted": id }))
        }
    }
}
