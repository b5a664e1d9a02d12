//! Предикат по объявлениям: строится цепочкой шагов визарда, сериализуется в подписку,
//! вычисляется в памяти или компилируется в SQL.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::Listing;

const KM_PER_DEGREE: f64 = 111.32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Kind,
    District,
    Street,
    ResidentialComplex,
    Rooms,
    RentPrice,
    Currency,
    LivingArea,
    TerritoryArea,
    Pets,
    Kids,
    Conditioner,
    Furniture,
    Latitude,
    Longitude,
}

impl Column {
    /// Имя колонки в таблице listings. Только из этого списка, поэтому безопасно вставлять в SQL.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Column::Kind => "kind",
            Column::District => "district",
            Column::Street => "street",
            Column::ResidentialComplex => "residential_complex",
            Column::Rooms => "rooms",
            Column::RentPrice => "rent_price",
            Column::Currency => "currency",
            Column::LivingArea => "living_area",
            Column::TerritoryArea => "territory_area",
            Column::Pets => "pets",
            Column::Kids => "kids",
            Column::Conditioner => "conditioner",
            Column::Furniture => "furniture",
            Column::Latitude => "latitude",
            Column::Longitude => "longitude",
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(
            self,
            Column::Kind | Column::District | Column::Street | Column::ResidentialComplex | Column::Currency
        )
    }

    pub fn value_of(&self, listing: &Listing) -> Option<Value> {
        let flag = |b: bool| Some(Value::Int(b as i64));
        match self {
            Column::Kind => Some(Value::Text(listing.kind.as_str().to_string())),
            Column::District => Some(Value::Text(listing.district.clone())),
            Column::Street => listing.street.clone().map(Value::Text),
            Column::ResidentialComplex => listing.residential_complex.clone().map(Value::Text),
            Column::Rooms => Some(Value::Int(listing.rooms)),
            Column::RentPrice => Some(Value::Real(listing.rent_price)),
            Column::Currency => Some(Value::Text(listing.currency.as_str().to_string())),
            Column::LivingArea => listing.living_area.map(Value::Real),
            Column::TerritoryArea => listing.territory_area.map(Value::Real),
            Column::Pets => flag(listing.pets),
            Column::Kids => flag(listing.kids),
            Column::Conditioner => flag(listing.conditioner),
            Column::Furniture => flag(listing.furniture),
            Column::Latitude => listing.latitude.map(Value::Real),
            Column::Longitude => listing.longitude.map(Value::Real),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            Value::Text(_) => None,
        }
    }

    /// Пустые строки в колонках не показываем пользователю
    pub fn is_blank(&self) -> bool {
        matches!(self, Value::Text(s) if s.trim().is_empty())
    }

    fn same_as(&self, other: &Value) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    /// Порядок для кнопок: числа по возрастанию, строки по алфавиту
    pub fn display_cmp(&self, other: &Value) -> Ordering {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.to_string().cmp(&other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    All,
    Eq {
        column: Column,
        value: Value,
    },
    In {
        column: Column,
        values: Vec<Value>,
    },
    Range {
        column: Column,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    /// Квадрат со стороной 2*radius вокруг точки
    Near {
        lat: f64,
        lng: f64,
        radius_m: f64,
    },
    And {
        all: Vec<Predicate>,
    },
    Or {
        any: Vec<Predicate>,
    },
}

impl Default for Predicate {
    fn default() -> Self {
        Predicate::All
    }
}

impl Predicate {
    pub fn eq(column: Column, value: Value) -> Self {
        Predicate::Eq { column, value }
    }

    pub fn is_in(column: Column, values: Vec<Value>) -> Self {
        Predicate::In { column, values }
    }

    pub fn range(column: Column, min: Option<f64>, max: Option<f64>) -> Self {
        if min.is_none() && max.is_none() {
            return Predicate::All;
        }
        Predicate::Range { column, min, max }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Predicate::All)
    }

    /// Сужает текущий предикат. `All` служит нейтральным элементом, вложенные And расплющиваются.
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::All, p) | (p, Predicate::All) => p,
            (Predicate::And { mut all }, Predicate::And { all: rest }) => {
                all.extend(rest);
                Predicate::And { all }
            }
            (Predicate::And { mut all }, p) => {
                all.push(p);
                Predicate::And { all }
            }
            (p, Predicate::And { all: rest }) => {
                let mut all = vec![p];
                all.extend(rest);
                Predicate::And { all }
            }
            (a, b) => Predicate::And { all: vec![a, b] },
        }
    }

    /// Объединение вариантов. Пустой список означает «без ограничений».
    pub fn any(mut parts: Vec<Predicate>) -> Predicate {
        if parts.iter().any(Predicate::is_all) {
            return Predicate::All;
        }
        match parts.len() {
            0 => Predicate::All,
            1 => parts.remove(0),
            _ => Predicate::Or { any: parts },
        }
    }

    pub fn matches(&self, listing: &Listing) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Eq { column, value } => column
                .value_of(listing)
                .map(|v| v.same_as(value))
                .unwrap_or(false),
            Predicate::In { column, values } => match column.value_of(listing) {
                Some(v) => values.iter().any(|candidate| v.same_as(candidate)),
                None => false,
            },
            Predicate::Range { column, min, max } => {
                match column.value_of(listing).and_then(|v| v.as_f64()) {
                    Some(v) => min.map_or(true, |m| v >= m) && max.map_or(true, |m| v <= m),
                    None => false,
                }
            }
            Predicate::Near { lat, lng, radius_m } => match (listing.latitude, listing.longitude) {
                (Some(la), Some(lo)) => {
                    let b = BoundingBox::around(*lat, *lng, *radius_m);
                    la >= b.lat_min && la <= b.lat_max && lo >= b.lng_min && lo <= b.lng_max
                }
                _ => false,
            },
            Predicate::And { all } => all.iter().all(|p| p.matches(listing)),
            Predicate::Or { any } => any.iter().any(|p| p.matches(listing)),
        }
    }

    /// SQL-условие для WHERE и параметры в порядке плейсхолдеров
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut binds = Vec::new();
        self.write_sql(&mut sql, &mut binds);
        (sql, binds)
    }

    fn write_sql(&self, sql: &mut String, binds: &mut Vec<Value>) {
        match self {
            Predicate::All => sql.push_str("1=1"),
            Predicate::Eq { column, value } => {
                sql.push_str(&format!("{} = ?", column.as_sql()));
                binds.push(value.clone());
            }
            Predicate::In { column, values } => {
                if values.is_empty() {
                    sql.push_str("1=0");
                    return;
                }
                let placeholders = vec!["?"; values.len()].join(", ");
                sql.push_str(&format!("{} IN ({})", column.as_sql(), placeholders));
                binds.extend(values.iter().cloned());
            }
            Predicate::Range { column, min, max } => {
                let mut parts = Vec::new();
                if let Some(min) = min {
                    parts.push(format!("{} >= ?", column.as_sql()));
                    binds.push(Value::Real(*min));
                }
                if let Some(max) = max {
                    parts.push(format!("{} <= ?", column.as_sql()));
                    binds.push(Value::Real(*max));
                }
                if parts.is_empty() {
                    sql.push_str("1=1");
                } else {
                    sql.push('(');
                    sql.push_str(&parts.join(" AND "));
                    sql.push(')');
                }
            }
            Predicate::Near { lat, lng, radius_m } => {
                let b = BoundingBox::around(*lat, *lng, *radius_m);
                sql.push_str("(latitude BETWEEN ? AND ? AND longitude BETWEEN ? AND ?)");
                binds.extend([
                    Value::Real(b.lat_min),
                    Value::Real(b.lat_max),
                    Value::Real(b.lng_min),
                    Value::Real(b.lng_max),
                ]);
            }
            Predicate::And { all } => Self::write_joined(all, " AND ", "1=1", sql, binds),
            Predicate::Or { any } => Self::write_joined(any, " OR ", "1=0", sql, binds),
        }
    }

    fn write_joined(parts: &[Predicate], sep: &str, empty: &str, sql: &mut String, binds: &mut Vec<Value>) {
        if parts.is_empty() {
            sql.push_str(empty);
            return;
        }
        sql.push('(');
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                sql.push_str(sep);
            }
            part.write_sql(sql, binds);
        }
        sql.push(')');
    }
}

struct BoundingBox {
    lat_min: f64,
    lat_max: f64,
    lng_min: f64,
    lng_max: f64,
}

impl BoundingBox {
    fn around(lat: f64, lng: f64, radius_m: f64) -> Self {
        let radius_km = radius_m / 1000.0;
        let d_lat = radius_km / KM_PER_DEGREE;
        let cos = lat.to_radians().cos().abs().max(0.01);
        let d_lng = radius_km / (KM_PER_DEGREE * cos);
        Self {
            lat_min: lat - d_lat,
            lat_max: lat + d_lat,
            lng_min: lng - d_lng,
            lng_max: lng + d_lng,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::Currency;
    use crate::store::ListingKind;
    use chrono::Utc;

    fn listing(district: &str, rooms: i64, price: f64) -> Listing {
        Listing {
            id: 1,
            kind: ListingKind::Apartment,
            district: district.to_string(),
            street: None,
            residential_complex: None,
            rooms,
            rent_price: price,
            currency: Currency::Uah,
            living_area: None,
            territory_area: None,
            pets: false,
            kids: true,
            conditioner: false,
            furniture: false,
            latitude: Some(49.8397),
            longitude: Some(24.0297),
            link: "https://t.me/c/1/1".to_string(),
            media_group_size: 1,
            caption: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn all_is_neutral_for_and() {
        let p = Predicate::eq(Column::District, Value::text("Сихівський"));
        assert_eq!(Predicate::All.and(p.clone()), p);
        assert_eq!(p.clone().and(Predicate::All), p);
        assert_eq!(Predicate::All.and(Predicate::All), Predicate::All);
    }

    #[test]
    fn nested_and_is_flattened() {
        let a = Predicate::eq(Column::Rooms, Value::Int(1));
        let b = Predicate::eq(Column::Kids, Value::Int(1));
        let c = Predicate::eq(Column::Pets, Value::Int(1));
        let p = a.clone().and(b.clone()).and(c.clone());
        assert_eq!(p, Predicate::And { all: vec![a, b, c] });
    }

    #[test]
    fn any_with_all_collapses_to_all() {
        let p = Predicate::any(vec![Predicate::All, Predicate::eq(Column::Rooms, Value::Int(2))]);
        assert!(p.is_all());
        assert!(Predicate::any(Vec::new()).is_all());
    }

    #[test]
    fn matches_numeric_columns_across_int_and_real() {
        let l = listing("Личаківський", 2, 15000.0);
        assert!(Predicate::eq(Column::Rooms, Value::Real(2.0)).matches(&l));
        assert!(Predicate::eq(Column::Kids, Value::Int(1)).matches(&l));
        assert!(Predicate::range(Column::RentPrice, Some(7500.0), Some(16500.0)).matches(&l));
        assert!(!Predicate::range(Column::RentPrice, Some(16000.0), None).matches(&l));
    }

    #[test]
    fn near_uses_bounding_box() {
        let l = listing("Галицький", 1, 1.0);
        assert!(Predicate::Near { lat: 49.8400, lng: 24.0300, radius_m: 500.0 }.matches(&l));
        assert!(!Predicate::Near { lat: 49.9, lng: 24.0300, radius_m: 500.0 }.matches(&l));
    }

    #[test]
    fn compiles_nested_predicate_to_sql() {
        let p = Predicate::eq(Column::Kind, Value::text("apartment"))
            .and(Predicate::is_in(Column::District, vec![Value::text("A"), Value::text("B")]))
            .and(Predicate::any(vec![
                Predicate::eq(Column::Rooms, Value::Int(1)),
                Predicate::range(Column::Rooms, Some(4.0), None),
            ]));
        let (sql, binds) = p.to_sql();
        assert_eq!(
            sql,
            "(kind = ? AND district IN (?, ?) AND (rooms = ? OR (rooms >= ?)))"
        );
        assert_eq!(binds.len(), 5);
        assert_eq!(binds[4], Value::Real(4.0));
    }

    #[test]
    fn empty_in_matches_nothing_in_sql() {
        let (sql, binds) = Predicate::is_in(Column::District, Vec::new()).to_sql();
        assert_eq!(sql, "1=0");
        assert!(binds.is_empty());
    }

    #[test]
    fn predicate_survives_json_round_trip() {
        let p = Predicate::eq(Column::Currency, Value::text("USD"))
            .and(Predicate::range(Column::RentPrice, Some(187.5), Some(412.5)))
            .and(Predicate::is_in(Column::Rooms, vec![Value::Int(1), Value::Int(2)]))
            .and(Predicate::Near { lat: 49.84, lng: 24.03, radius_m: 1000.0 });
        let json = serde_json::to_string(&p).unwrap();
        let back: Predicate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }
}
