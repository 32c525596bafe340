use std::collections::HashMap;

use crate::datum::FieldType;

/// The ordered list of fields in a table and their types.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<String>,
    info: HashMap<String, FieldType>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field(&mut self, name: &str, field_type: FieldType) -> &mut Self {
        assert!(
            !self.has_field(name),
            "field '{}' is already part of the schema",
            name
        );
        self.fields.push(name.to_string());
        self.info.insert(name.to_string(), field_type);
        self
    }

    pub fn add_int_field(&mut self, name: &str) -> &mut Self {
        self.add_field(name, FieldType::Int)
    }

    pub fn add_bigint_field(&mut self, name: &str) -> &mut Self {
        self.add_field(name, FieldType::BigInt)
    }

    pub fn add_double_field(&mut self, name: &str) -> &mut Self {
        self.add_field(name, FieldType::Double)
    }

    pub fn add_string_field(&mut self, name: &str, length: usize) -> &mut Self {
        self.add_field(name, FieldType::Varchar(length))
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.info.get(name).copied()
    }

    /// Field names in the order they were added.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.info.contains_key(name)
    }
}

/// Build a `Schema` from a list of `name => type` pairs.
///
/// ```ignore
/// let schema = make_schema! {
///     "id" => i32,
///     "name" => varchar(20)
/// };
/// ```
#[macro_export]
macro_rules! make_schema {
    (@add $schema:ident, $name:expr, i32) => {
        $schema.add_int_field($name);
    };
    (@add $schema:ident, $name:expr, i64) => {
        $schema.add_bigint_field($name);
    };
    (@add $schema:ident, $name:expr, f64) => {
        $schema.add_double_field($name);
    };
    (@add $schema:ident, $name:expr, varchar($len:expr)) => {
        $schema.add_string_field($name, $len);
    };
    ($($name:expr => $typ:ident $(($len:expr))?),* $(,)?) => {{
        let mut schema = $crate::schema::Schema::new();
        $(
            $crate::make_schema!(@add schema, $name, $typ $(($len))?);
        )*
        schema
    }};
}
