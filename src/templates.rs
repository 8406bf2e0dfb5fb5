use crate::config::TemplatesConfig;
use crate::{Result, TankerError, log_debug};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// An environment archetype: a named, ordered set of services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<BTreeMap<String, String>>,
}

impl Template {
    /// Check the structural rules every catalog entry must satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(TankerError::Validation(
                "Template id cannot be empty".to_string(),
            ));
        }
        if self.services.is_empty() {
            return Err(TankerError::Validation(format!(
                "Template '{}' defines no services",
                self.id
            )));
        }

        let mut names = HashSet::new();
        for service in &self.services {
            if service.name.trim().is_empty() {
                return Err(TankerError::Validation(format!(
                    "Template '{}' has a service without a name",
                    self.id
                )));
            }
            if service.image.trim().is_empty() {
                return Err(TankerError::Validation(format!(
                    "Service '{}' in template '{}' has no image",
                    service.name, self.id
                )));
            }
            if !names.insert(service.name.as_str()) {
                return Err(TankerError::Validation(format!(
                    "Template '{}' declares service '{}' twice",
                    self.id, service.name
                )));
            }
        }

        for service in &self.services {
            for dependency in service.depends_on.iter().flatten() {
                if dependency == &service.name || !names.contains(dependency.as_str()) {
                    return Err(TankerError::Validation(format!(
                        "Service '{}' in template '{}' depends on unknown service '{}'",
                        service.name, self.id, dependency
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Read-only registry of templates, built once at startup.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: Vec<Template>,
}

impl TemplateCatalog {
    /// Catalog holding only the built-in templates.
    pub fn new() -> Self {
        Self {
            templates: builtin_templates(),
        }
    }

    /// Validate and index an explicit template list.
    pub fn with_templates(templates: Vec<Template>) -> Result<Self> {
        let mut ids = HashSet::new();
        for template in &templates {
            template.validate()?;
            if !ids.insert(template.id.clone()) {
                return Err(TankerError::Validation(format!(
                    "Template id '{}' is defined more than once",
                    template.id
                )));
            }
        }
        Ok(Self { templates })
    }

    pub fn from_config(config: &TemplatesConfig) -> Result<Self> {
        let mut templates = if config.enable_builtin {
            builtin_templates()
        } else {
            Vec::new()
        };
        templates.extend(config.custom.iter().cloned());

        let catalog = Self::with_templates(templates)?;
        log_debug!(
            "Template catalog loaded with {} templates ({} custom)",
            catalog.templates.len(),
            config.custom.len()
        );
        Ok(catalog)
    }

    pub fn list_templates(&self) -> Vec<Template> {
        self.templates.clone()
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn get_template(&self, id: &str) -> Result<&Template> {
        self.templates
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| TankerError::TemplateNotFound(id.to_string()))
    }

    pub fn templates_by_tag(&self, tag: &str) -> Vec<&Template> {
        self.templates.iter().filter(|t| t.has_tag(tag)).collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn env_vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn builtin_templates() -> Vec<Template> {
    vec![node_react(), django_postgres(), lamp()]
}

fn node_react() -> Template {
    Template {
        id: "node-react".to_string(),
        name: "Node.js + React".to_string(),
        description:
            "Full-stack JavaScript development with Node.js backend and React frontend"
                .to_string(),
        icon: Some("node-react.png".to_string()),
        tags: strings(&["JavaScript", "Node.js", "React"]),
        services: vec![
            Service {
                name: "backend".to_string(),
                image: "node:16".to_string(),
                ports: strings(&["3000:3000"]),
                volumes: strings(&["./backend:/app"]),
                working_dir: Some("/app".to_string()),
                command: Some("npm start".to_string()),
                ..Default::default()
            },
            Service {
                name: "frontend".to_string(),
                image: "node:16".to_string(),
                ports: strings(&["8000:8000"]),
                volumes: strings(&["./frontend:/app"]),
                working_dir: Some("/app".to_string()),
                command: Some("npm start".to_string()),
                ..Default::default()
            },
        ],
    }
}

fn django_postgres() -> Template {
    Template {
        id: "django-postgres".to_string(),
        name: "Django + PostgreSQL".to_string(),
        description: "Python web development with Django and PostgreSQL database".to_string(),
        icon: Some("django-postgres.png".to_string()),
        tags: strings(&["Python", "Django", "PostgreSQL"]),
        services: vec![
            Service {
                name: "web".to_string(),
                image: "python:3.9".to_string(),
                ports: strings(&["8000:8000"]),
                volumes: strings(&["./app:/app"]),
                working_dir: Some("/app".to_string()),
                command: Some("python manage.py runserver 0.0.0.0:8000".to_string()),
                depends_on: Some(strings(&["db"])),
                ..Default::default()
            },
            Service {
                name: "db".to_string(),
                image: "postgres:13".to_string(),
                ports: strings(&["5432:5432"]),
                volumes: strings(&["postgres_data:/var/lib/postgresql/data"]),
                environment: Some(env_vars(&[
                    ("POSTGRES_PASSWORD", "postgres"),
                    ("POSTGRES_USER", "postgres"),
                    ("POSTGRES_DB", "postgres"),
                ])),
                ..Default::default()
            },
        ],
    }
}

fn lamp() -> Template {
    Template {
        id: "lamp".to_string(),
        name: "LAMP Stack".to_string(),
        description: "Linux, Apache, MySQL, and PHP development environment".to_string(),
        icon: Some("lamp.png".to_string()),
        tags: strings(&["PHP", "MySQL", "Apache"]),
        services: vec![
            Service {
                name: "web".to_string(),
                image: "php:8.0-apache".to_string(),
                ports: strings(&["80:80"]),
                volumes: strings(&["./app:/var/www/html"]),
                ..Default::default()
            },
            Service {
                name: "db".to_string(),
                image: "mysql:8.0".to_string(),
                ports: strings(&["3306:3306"]),
                volumes: strings(&["mysql_data:/var/lib/mysql"]),
                environment: Some(env_vars(&[
                    ("MYSQL_ROOT_PASSWORD", "root"),
                    ("MYSQL_DATABASE", "app"),
                ])),
                ..Default::default()
            },
        ],
    }
}
