use crate::internal::common::Map;
use crate::internal::common::error::AllocError;
use crate::internal::common::limits::{
    MAX_GROUP_CU_NUM, MAX_GROUP_OPTION_NUM, MAX_GROUP_TEMPLATE_NUM, MAX_NAME_LEN,
};
use crate::internal::core::Core;
use crate::internal::inventory::cu::Scope;
use crate::internal::request::CuListRequest;
use serde::{Deserialize, Serialize};

/// Named set of alternative CU lists, tried in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupTemplate {
    pub name: String,
    pub options: Vec<CuListRequest>,
}

impl GroupTemplate {
    pub fn new(name: impl Into<String>, options: Vec<CuListRequest>) -> Self {
        GroupTemplate {
            name: name.into(),
            options,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.name.is_empty() || self.name.len() > MAX_NAME_LEN {
            return Err(AllocError::invalid(format!(
                "Invalid group name '{}'",
                self.name
            )));
        }
        if self.options.is_empty() || self.options.len() > MAX_GROUP_OPTION_NUM {
            return Err(AllocError::invalid(format!(
                "Group '{}' must have 1..={MAX_GROUP_OPTION_NUM} options",
                self.name
            )));
        }
        for option in &self.options {
            option.validate()?;
            if option.entries.len() > MAX_GROUP_CU_NUM {
                return Err(AllocError::invalid(format!(
                    "Option of group '{}' has more than {MAX_GROUP_CU_NUM} compute units",
                    self.name
                )));
            }
            if option.entries.iter().any(|e| e.scope() != Scope::Global) {
                return Err(AllocError::invalid(format!(
                    "Group '{}' binds a pool; pools are chosen at allocation time",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroupTemplateRegistry {
    templates: Map<String, GroupTemplate>,
}

impl GroupTemplateRegistry {
    pub fn get(&self, name: &str) -> Option<&GroupTemplate> {
        self.templates.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Sorted by name
    pub fn templates(&self) -> Vec<&GroupTemplate> {
        let mut templates: Vec<_> = self.templates.values().collect();
        templates.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Declares a template; an existing one is replaced only while nothing allocated from it is outstanding.
pub fn declare_group(core: &mut Core, template: GroupTemplate) -> crate::Result<()> {
    template.validate()?;
    let split = core.split_mut();
    if split.templates.contains(&template.name) {
        if split.registry.is_template_in_use(&template.name) {
            log::warn!("Group '{}' is in use and cannot be redeclared", template.name);
            return Err(AllocError::TemplateInUse(template.name));
        }
        log::info!("Group '{}' redeclared", template.name);
    } else {
        if split.templates.len() >= MAX_GROUP_TEMPLATE_NUM {
            return Err(AllocError::invalid(format!(
                "At most {MAX_GROUP_TEMPLATE_NUM} groups can be declared"
            )));
        }
        log::info!(
            "Group '{}' declared with {} options",
            template.name,
            template.options.len()
        );
    }
    split
        .templates
        .templates
        .insert(template.name.clone(), template);
    Ok(())
}

pub fn undeclare_group(core: &mut Core, name: &str) -> crate::Result<GroupTemplate> {
    let split = core.split_mut();
    if !split.templates.contains(name) {
        return Err(AllocError::UnknownTemplate(name.to_string()));
    }
    if split.registry.is_template_in_use(name) {
        log::warn!("Group '{name}' is in use and cannot be undeclared");
        return Err(AllocError::TemplateInUse(name.to_string()));
    }
    log::info!("Group '{name}' undeclared");
    split
        .templates
        .templates
        .remove(name)
        .ok_or_else(|| AllocError::UnknownTemplate(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::request::CuRequest;

    fn template(name: &str) -> GroupTemplate {
        GroupTemplate::new(
            name,
            vec![CuListRequest::new(vec![CuRequest::shared("a", 10)], false)],
        )
    }

    #[test]
    fn test_declare_undeclare() {
        let mut core = Core::default();
        declare_group(&mut core, template("g")).unwrap();
        declare_group(&mut core, template("g")).unwrap();
        assert_eq!(core.templates().len(), 1);
        undeclare_group(&mut core, "g").unwrap();
        assert_eq!(
            undeclare_group(&mut core, "g"),
            Err(AllocError::UnknownTemplate("g".into()))
        );
    }

    #[test]
    fn test_invalid_templates() {
        let mut core = Core::default();
        assert!(declare_group(&mut core, GroupTemplate::new("g", vec![])).is_err());
        assert!(declare_group(&mut core, template("")).is_err());
        let options = (0..MAX_GROUP_OPTION_NUM + 1)
            .map(|_| template("g").options[0].clone())
            .collect();
        assert!(declare_group(&mut core, GroupTemplate::new("g", options)).is_err());
        for i in 0..MAX_GROUP_TEMPLATE_NUM {
            declare_group(&mut core, template(&format!("g{i}"))).unwrap();
        }
        assert!(declare_group(&mut core, template("one-too-many")).is_err());
        assert_eq!(core.templates().len(), MAX_GROUP_TEMPLATE_NUM);
    }
}
