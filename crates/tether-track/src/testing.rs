//! Shared fixture entities for the engine's unit tests.

use tether_core::{
    ComplexTypeInfo, Entity, FieldInfo, Record, RelationshipInfo, Result, ScalarType, Value,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Category {
    pub id: String,
    pub name: String,
}

impl Entity for Category {
    const SET_NAME: &'static str = "Categories";
    const KEY: &'static [&'static str] = &["Id"];
    const RELATIONSHIPS: &'static [RelationshipInfo] =
        &[RelationshipInfo::one_to_many("Products", "Products").inverse("Category")];

    fn fields() -> &'static [FieldInfo] {
        static FIELDS: &[FieldInfo] = &[
            FieldInfo::new("Id", ScalarType::Text).key(true),
            FieldInfo::new("Name", ScalarType::Text),
        ];
        FIELDS
    }

    fn to_record(&self) -> Record {
        let mut r = Record::new();
        r.push("Id", Value::Text(self.id.clone()));
        r.push("Name", Value::Text(self.name.clone()));
        r
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record
                .get("Id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            name: record
                .get("Name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Product {
    pub id: i32,
    pub name: String,
    pub category_id: Option<String>,
}

impl Entity for Product {
    const SET_NAME: &'static str = "Products";
    const KEY: &'static [&'static str] = &["Id"];
    const RELATIONSHIPS: &'static [RelationshipInfo] = &[RelationshipInfo::many_to_one(
        "Category",
        "Categories",
        &["CategoryId"],
    )
    .fk_nullable(true)
    .inverse("Products")];

    fn fields() -> &'static [FieldInfo] {
        static FIELDS: &[FieldInfo] = &[
            FieldInfo::new("Id", ScalarType::Int).key(true),
            FieldInfo::new("Name", ScalarType::Text),
            FieldInfo::new("CategoryId", ScalarType::Text).nullable(true),
        ];
        FIELDS
    }

    fn to_record(&self) -> Record {
        let mut r = Record::new();
        r.push("Id", Value::Int(self.id));
        r.push("Name", Value::Text(self.name.clone()));
        r.push("CategoryId", Value::from(self.category_id.clone()));
        r
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get("Id").and_then(Value::as_i64).unwrap_or_default() as i32,
            name: record
                .get("Name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            category_id: record
                .get("CategoryId")
                .and_then(Value::as_str)
                .map(ToString::to_string),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Order {
    pub id: i32,
}

impl Entity for Order {
    const SET_NAME: &'static str = "Orders";
    const KEY: &'static [&'static str] = &["Id"];
    const RELATIONSHIPS: &'static [RelationshipInfo] =
        &[RelationshipInfo::one_to_many("Lines", "OrderLines").inverse("Order")];

    fn fields() -> &'static [FieldInfo] {
        static FIELDS: &[FieldInfo] = &[FieldInfo::new("Id", ScalarType::Int).key(true)];
        FIELDS
    }

    fn to_record(&self) -> Record {
        let mut r = Record::new();
        r.push("Id", Value::Int(self.id));
        r
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get("Id").and_then(Value::as_i64).unwrap_or_default() as i32,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OrderLine {
    pub id: i32,
    pub order_id: i32,
}

impl Entity for OrderLine {
    const SET_NAME: &'static str = "OrderLines";
    const KEY: &'static [&'static str] = &["Id"];
    const RELATIONSHIPS: &'static [RelationshipInfo] =
        &[RelationshipInfo::many_to_one("Order", "Orders", &["OrderId"]).inverse("Lines")];

    fn fields() -> &'static [FieldInfo] {
        static FIELDS: &[FieldInfo] = &[
            FieldInfo::new("Id", ScalarType::Int).key(true),
            FieldInfo::new("OrderId", ScalarType::Int),
        ];
        FIELDS
    }

    fn to_record(&self) -> Record {
        let mut r = Record::new();
        r.push("Id", Value::Int(self.id));
        r.push("OrderId", Value::Int(self.order_id));
        r
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get("Id").and_then(Value::as_i64).unwrap_or_default() as i32,
            order_id: record
                .get("OrderId")
                .and_then(Value::as_i64)
                .unwrap_or_default() as i32,
        })
    }
}

static ADDRESS: ComplexTypeInfo = ComplexTypeInfo {
    type_name: "Address",
    fields: &[
        FieldInfo::new("Street", ScalarType::Text),
        FieldInfo::new("City", ScalarType::Text).nullable(true),
    ],
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Building {
    pub id: i32,
    pub name: String,
    pub value: String,
    pub street: String,
    pub city: Option<String>,
}

impl Entity for Building {
    const SET_NAME: &'static str = "Buildings";
    const KEY: &'static [&'static str] = &["Id"];

    fn fields() -> &'static [FieldInfo] {
        static FIELDS: &[FieldInfo] = &[
            FieldInfo::new("Id", ScalarType::Int).key(true),
            FieldInfo::new("Name", ScalarType::Text),
            FieldInfo::new("Value", ScalarType::Decimal),
            FieldInfo::complex("Address", &ADDRESS),
        ];
        FIELDS
    }

    fn to_record(&self) -> Record {
        let mut r = Record::new();
        r.push("Id", Value::Int(self.id));
        r.push("Name", Value::Text(self.name.clone()));
        r.push("Value", Value::Decimal(self.value.clone()));
        r.push("Address.Street", Value::Text(self.street.clone()));
        r.push("Address.City", Value::from(self.city.clone()));
        r
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get("Id").and_then(Value::as_i64).unwrap_or_default() as i32,
            name: record
                .get("Name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            value: record
                .get("Value")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            street: record
                .get("Address.Street")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            city: record
                .get("Address.City")
                .and_then(Value::as_str)
                .map(ToString::to_string),
        })
    }
}

pub(crate) fn beverages() -> Category {
    Category {
        id: "Beverages".into(),
        name: "Beverages".into(),
    }
}

pub(crate) fn chai(category_id: Option<&str>) -> Product {
    Product {
        id: 1,
        name: "Chai".into(),
        category_id: category_id.map(ToString::to_string),
    }
}

pub(crate) fn building_one() -> Building {
    Building {
        id: 1,
        name: "Building One".into(),
        value: "1500000.00".into(),
        street: "Main".into(),
        city: Some("Redmond".into()),
    }
}
