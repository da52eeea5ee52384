//! Attribute definitions and the [`Schema`] builder.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::validators::{DiffSuppress, Validator};

/// The value type of an attribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "element", rename_all = "snake_case")]
pub enum AttributeType {
    /// A string.
    String,
    /// A 64-bit integer.
    Int,
    /// A floating point number.
    Float,
    /// A boolean.
    Bool,
    /// An ordered list of elements.
    List(Box<AttributeType>),
    /// An unordered collection of unique elements.
    Set(Box<AttributeType>),
    /// A string-keyed map.
    Map(Box<AttributeType>),
    /// A nested block (list or set of objects).
    Block(Box<NestedBlock>),
}

impl AttributeType {
    /// List of strings.
    #[must_use]
    pub fn string_list() -> Self {
        Self::List(Box::new(Self::String))
    }

    /// Set of strings.
    #[must_use]
    pub fn string_set() -> Self {
        Self::Set(Box::new(Self::String))
    }

    /// Map of strings.
    #[must_use]
    pub fn string_map() -> Self {
        Self::Map(Box::new(Self::String))
    }

    /// Human readable type name used in error messages.
    #[must_use]
    pub fn describe(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "integer",
            Self::Float => "number",
            Self::Bool => "bool",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
            Self::Block(_) => "block",
        }
    }

    /// True for lists, sets, maps and blocks.
    #[must_use]
    pub const fn is_collection(&self) -> bool {
        matches!(self, Self::List(_) | Self::Set(_) | Self::Map(_) | Self::Block(_))
    }

    /// True for sets and set blocks, whose element order is not significant.
    #[must_use]
    pub fn is_set(&self) -> bool {
        match self {
            Self::Set(_) => true,
            Self::Block(block) => block.set,
            _ => false,
        }
    }
}

/// A nested block: a list (or set) of objects sharing one schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NestedBlock {
    /// Schema of each element.
    pub schema: Schema,
    /// Minimum number of elements.
    pub min_items: usize,
    /// Maximum number of elements, unbounded when `None`.
    pub max_items: Option<usize>,
    /// Element order is not significant.
    pub set: bool,
}

impl NestedBlock {
    /// A list block.
    #[must_use]
    pub const fn list(schema: Schema) -> Self {
        Self {
            schema,
            min_items: 0,
            max_items: None,
            set: false,
        }
    }

    /// A set block.
    #[must_use]
    pub const fn set(schema: Schema) -> Self {
        Self {
            schema,
            min_items: 0,
            max_items: None,
            set: true,
        }
    }

    /// A block holding at most one element.
    #[must_use]
    pub const fn single(schema: Schema) -> Self {
        Self {
            schema,
            min_items: 0,
            max_items: Some(1),
            set: false,
        }
    }
}

/// One attribute of a resource, data source or provider schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribute {
    /// Value type.
    #[serde(rename = "type")]
    pub ty: AttributeType,
    /// Must be set in configuration.
    pub required: bool,
    /// May be set in configuration.
    pub optional: bool,
    /// Populated by the provider.
    pub computed: bool,
    /// A change forces the object to be replaced.
    pub force_new: bool,
    /// Hidden from plan output.
    pub sensitive: bool,
    /// Value used when configuration omits the attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Sibling attributes that may not be set together with this one.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicts_with: Vec<String>,
    /// Exactly one of these siblings (this attribute included) must be set.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exactly_one_of: Vec<String>,
    /// Value validators.
    #[serde(skip)]
    pub validators: Vec<Validator>,
    /// Rule deciding when two differing values are equivalent.
    #[serde(skip)]
    pub diff_suppress: Option<DiffSuppress>,
    /// Documentation string.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Deprecation message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<String>,
}

impl Attribute {
    const fn base(ty: AttributeType) -> Self {
        Self {
            ty,
            required: false,
            optional: false,
            computed: false,
            force_new: false,
            sensitive: false,
            default: None,
            conflicts_with: Vec::new(),
            exactly_one_of: Vec::new(),
            validators: Vec::new(),
            diff_suppress: None,
            description: String::new(),
            deprecated: None,
        }
    }

    /// A required attribute.
    #[must_use]
    pub const fn required(ty: AttributeType) -> Self {
        let mut attr = Self::base(ty);
        attr.required = true;
        attr
    }

    /// An optional attribute.
    #[must_use]
    pub const fn optional(ty: AttributeType) -> Self {
        let mut attr = Self::base(ty);
        attr.optional = true;
        attr
    }

    /// A read-only attribute set by the provider.
    #[must_use]
    pub const fn computed(ty: AttributeType) -> Self {
        let mut attr = Self::base(ty);
        attr.computed = true;
        attr
    }

    /// Required string.
    #[must_use]
    pub const fn required_string() -> Self {
        Self::required(AttributeType::String)
    }

    /// Optional string.
    #[must_use]
    pub const fn optional_string() -> Self {
        Self::optional(AttributeType::String)
    }

    /// Optional integer.
    #[must_use]
    pub const fn optional_int() -> Self {
        Self::optional(AttributeType::Int)
    }

    /// Optional bool.
    #[must_use]
    pub const fn optional_bool() -> Self {
        Self::optional(AttributeType::Bool)
    }

    /// Optional attribute the provider fills when configuration omits it.
    #[must_use]
    pub const fn also_computed(mut self) -> Self {
        self.computed = true;
        self
    }

    /// Changing the value replaces the object.
    #[must_use]
    pub const fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Hides the value in plan output.
    #[must_use]
    pub const fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Declares conflicting sibling attributes.
    #[must_use]
    pub fn conflicts_with(mut self, others: &[&str]) -> Self {
        self.conflicts_with = others.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Declares an exactly-one-of group.
    #[must_use]
    pub fn exactly_one_of(mut self, group: &[&str]) -> Self {
        self.exactly_one_of = group.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Adds a validator.
    #[must_use]
    pub fn validate(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Sets the diff suppression rule.
    #[must_use]
    pub fn suppress_diff(mut self, rule: DiffSuppress) -> Self {
        self.diff_suppress = Some(rule);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Marks the attribute as deprecated.
    #[must_use]
    pub fn deprecate(mut self, message: impl Into<String>) -> Self {
        self.deprecated = Some(message.into());
        self
    }

    /// True when configuration may set this attribute.
    #[must_use]
    pub const fn is_configurable(&self) -> bool {
        self.required || self.optional
    }

    /// Nested block schema, if this attribute is a block.
    #[must_use]
    pub fn block(&self) -> Option<&NestedBlock> {
        match &self.ty {
            AttributeType::Block(block) => Some(block),
            _ => None,
        }
    }
}

/// An ordered collection of named attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Schema {
    /// Schema version, bumped on incompatible state layout changes.
    pub version: u32,
    /// Documentation string.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Attributes by name.
    pub attributes: BTreeMap<String, Attribute>,
}

impl Schema {
    /// An empty version 0 schema.
    #[must_use]
    pub const fn v0() -> Self {
        Self {
            version: 0,
            description: String::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: &str, attribute: Attribute) -> Self {
        self.attributes.insert(name.to_string(), attribute);
        self
    }

    /// Looks up an attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// Names of attributes whose change replaces the object.
    #[must_use]
    pub fn force_new_attributes(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|(_, a)| a.force_new)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Names of sensitive attributes.
    #[must_use]
    pub fn sensitive_attributes(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|(_, a)| a.sensitive)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute(
                "type",
                Attribute::required_string().force_new().describe("monitor type"),
            )
            .with_attribute("url", Attribute::optional_string().also_computed());

        assert_eq!(schema.attributes.len(), 3);
        assert_eq!(schema.force_new_attributes(), vec!["type"]);
        let url = schema.attribute("url").unwrap();
        assert!(url.optional && url.computed);
        assert!(url.is_configurable());
    }

    #[test]
    fn test_block_is_set() {
        let hook = AttributeType::Block(Box::new(NestedBlock::set(Schema::v0())));
        assert!(hook.is_set());
        assert!(AttributeType::string_set().is_set());
        assert!(!AttributeType::string_list().is_set());
    }
}
