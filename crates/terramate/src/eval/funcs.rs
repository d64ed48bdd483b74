//! the `tm_` prefixed function table
//!
//! The prefix is what lets configuration authors say "evaluate this now":
//! `tm_upper(global.name)` runs at generation time while a plain
//! `upper(local.name)` is preserved verbatim for downstream tooling.
//! Semantics follow the unprefixed Terraform counterparts.
//!
//! `tm_try` is absent here: its arguments must evaluate lazily, which a
//! function definition cannot express, so the context rewrites those calls
//! before evaluation (see [super::Context]).

use hcl::eval::{Context, FuncArgs, FuncDef, ParamType};
use hcl::value::Map;
use hcl::{Number, Value};

/// Declares every `tm_` function on the given context.
pub(crate) fn declare_all(ctx: &mut Context) {
    let string_fn = |f: fn(FuncArgs) -> Result<Value, String>| {
        FuncDef::builder().param(ParamType::String).build(f)
    };

    ctx.declare_func("tm_upper", string_fn(tm_upper));
    ctx.declare_func("tm_lower", string_fn(tm_lower));
    ctx.declare_func("tm_title", string_fn(tm_title));
    ctx.declare_func("tm_trimspace", string_fn(tm_trimspace));
    ctx.declare_func(
        "tm_join",
        FuncDef::builder()
            .param(ParamType::String)
            .param(ParamType::Array(Box::new(ParamType::Any)))
            .build(tm_join),
    );
    ctx.declare_func(
        "tm_split",
        FuncDef::builder()
            .param(ParamType::String)
            .param(ParamType::String)
            .build(tm_split),
    );
    ctx.declare_func(
        "tm_replace",
        FuncDef::builder()
            .param(ParamType::String)
            .param(ParamType::String)
            .param(ParamType::String)
            .build(tm_replace),
    );
    ctx.declare_func(
        "tm_format",
        FuncDef::builder()
            .param(ParamType::String)
            .variadic_param(ParamType::Any)
            .build(tm_format),
    );
    ctx.declare_func(
        "tm_length",
        FuncDef::builder().param(ParamType::Any).build(tm_length),
    );
    ctx.declare_func(
        "tm_concat",
        FuncDef::builder()
            .variadic_param(ParamType::Array(Box::new(ParamType::Any)))
            .build(tm_concat),
    );
    ctx.declare_func(
        "tm_merge",
        FuncDef::builder()
            .variadic_param(ParamType::Object(Box::new(ParamType::Any)))
            .build(tm_merge),
    );
    ctx.declare_func(
        "tm_keys",
        FuncDef::builder()
            .param(ParamType::Object(Box::new(ParamType::Any)))
            .build(tm_keys),
    );
    ctx.declare_func(
        "tm_values",
        FuncDef::builder()
            .param(ParamType::Object(Box::new(ParamType::Any)))
            .build(tm_values),
    );
    ctx.declare_func(
        "tm_min",
        FuncDef::builder()
            .variadic_param(ParamType::Number)
            .build(tm_min),
    );
    ctx.declare_func(
        "tm_max",
        FuncDef::builder()
            .variadic_param(ParamType::Number)
            .build(tm_max),
    );
    ctx.declare_func(
        "tm_abs",
        FuncDef::builder().param(ParamType::Number).build(tm_abs),
    );
    ctx.declare_func(
        "tm_coalesce",
        FuncDef::builder()
            .variadic_param(ParamType::Any)
            .build(tm_coalesce),
    );
    ctx.declare_func(
        "tm_compact",
        FuncDef::builder()
            .param(ParamType::Array(Box::new(ParamType::String)))
            .build(tm_compact),
    );
    ctx.declare_func(
        "tm_contains",
        FuncDef::builder()
            .param(ParamType::Array(Box::new(ParamType::Any)))
            .param(ParamType::Any)
            .build(tm_contains),
    );
    ctx.declare_func(
        "tm_reverse",
        FuncDef::builder()
            .param(ParamType::Array(Box::new(ParamType::Any)))
            .build(tm_reverse),
    );
    ctx.declare_func(
        "tm_tostring",
        FuncDef::builder().param(ParamType::Any).build(tm_tostring),
    );
    ctx.declare_func(
        "tm_tonumber",
        FuncDef::builder().param(ParamType::Any).build(tm_tonumber),
    );
}

fn args_vec(args: FuncArgs) -> Vec<Value> {
    args.iter().cloned().collect()
}

fn string_arg(value: &Value) -> Result<&str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("expected a string, got `{value}`"))
}

fn tm_upper(args: FuncArgs) -> Result<Value, String> {
    let args = args_vec(args);
    Ok(Value::from(string_arg(&args[0])?.to_uppercase()))
}

fn tm_lower(args: FuncArgs) -> Result<Value, String> {
    let args = args_vec(args);
    Ok(Value::from(string_arg(&args[0])?.to_lowercase()))
}

fn tm_title(args: FuncArgs) -> Result<Value, String> {
    let args = args_vec(args);
    let mut out = String::new();
    let mut at_word_start = true;
    for ch in string_arg(&args[0])?.chars() {
        if at_word_start {
            out.extend(ch.to_uppercase());
        } else {
            out.push(ch);
        }
        at_word_start = ch.is_whitespace();
    }
    Ok(Value::from(out))
}

fn tm_trimspace(args: FuncArgs) -> Result<Value, String> {
    let args = args_vec(args);
    Ok(Value::from(string_arg(&args[0])?.trim().to_string()))
}

fn tm_join(args: FuncArgs) -> Result<Value, String> {
    let args = args_vec(args);
    let sep = string_arg(&args[0])?;
    let items = args[1]
        .as_array()
        .ok_or_else(|| "join expects a list".to_string())?;
    let parts: Vec<String> = items.iter().map(scalar_string).collect::<Result<_, _>>()?;
    Ok(Value::from(parts.join(sep)))
}

fn tm_split(args: FuncArgs) -> Result<Value, String> {
    let args = args_vec(args);
    let sep = string_arg(&args[0])?;
    let subject = string_arg(&args[1])?;
    Ok(Value::Array(
        subject.split(sep).map(Value::from).collect(),
    ))
}

fn tm_replace(args: FuncArgs) -> Result<Value, String> {
    let args = args_vec(args);
    let subject = string_arg(&args[0])?;
    let from = string_arg(&args[1])?;
    let to = string_arg(&args[2])?;
    Ok(Value::from(subject.replace(from, to)))
}

// printf-like subset: %s, %d, %f, %v and %% are enough for configuration
// templating.
fn tm_format(args: FuncArgs) -> Result<Value, String> {
    let args = args_vec(args);
    let spec = string_arg(&args[0])?;
    let mut out = String::new();
    let mut values = args[1..].iter();
    let mut chars = spec.chars();

    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        let verb = chars
            .next()
            .ok_or_else(|| "format string ends with a lone %".to_string())?;
        if verb == '%' {
            out.push('%');
            continue;
        }
        let value = values
            .next()
            .ok_or_else(|| format!("not enough arguments for format {spec:?}"))?;
        match verb {
            's' | 'v' => out.push_str(&scalar_string(value)?),
            'd' => {
                let num = number_arg(value)?;
                out.push_str(&format!("{}", num as i64));
            }
            'f' => {
                let num = number_arg(value)?;
                out.push_str(&format!("{num}"));
            }
            other => return Err(format!("unsupported format verb %{other}")),
        }
    }

    if values.next().is_some() {
        return Err(format!("too many arguments for format {spec:?}"));
    }
    Ok(Value::from(out))
}

fn tm_length(args: FuncArgs) -> Result<Value, String> {
    let args = args_vec(args);
    let len = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => return Err(format!("cannot take length of `{other}`")),
    };
    Ok(Value::from(len as u64))
}

fn tm_concat(args: FuncArgs) -> Result<Value, String> {
    let mut out = Vec::new();
    for arg in args_vec(args) {
        match arg {
            Value::Array(items) => out.extend(items),
            other => return Err(format!("concat expects lists, got `{other}`")),
        }
    }
    Ok(Value::Array(out))
}

fn tm_merge(args: FuncArgs) -> Result<Value, String> {
    let mut out: Map<String, Value> = Map::new();
    for arg in args_vec(args) {
        match arg {
            Value::Object(map) => out.extend(map),
            other => return Err(format!("merge expects objects, got `{other}`")),
        }
    }
    Ok(Value::Object(out))
}

fn tm_keys(args: FuncArgs) -> Result<Value, String> {
    let args = args_vec(args);
    let map = args[0]
        .as_object()
        .ok_or_else(|| "keys expects an object".to_string())?;
    Ok(Value::Array(map.keys().cloned().map(Value::from).collect()))
}

fn tm_values(args: FuncArgs) -> Result<Value, String> {
    let args = args_vec(args);
    let map = args[0]
        .as_object()
        .ok_or_else(|| "values expects an object".to_string())?;
    Ok(Value::Array(map.values().cloned().collect()))
}

fn tm_min(args: FuncArgs) -> Result<Value, String> {
    fold_numbers(args, "min", f64::min)
}

fn tm_max(args: FuncArgs) -> Result<Value, String> {
    fold_numbers(args, "max", f64::max)
}

fn fold_numbers(args: FuncArgs, what: &str, pick: fn(f64, f64) -> f64) -> Result<Value, String> {
    let args = args_vec(args);
    if args.is_empty() {
        return Err(format!("{what} requires at least one argument"));
    }
    let mut acc = number_arg(&args[0])?;
    for arg in &args[1..] {
        acc = pick(acc, number_arg(arg)?);
    }
    number_value(acc)
}

fn tm_abs(args: FuncArgs) -> Result<Value, String> {
    let args = args_vec(args);
    number_value(number_arg(&args[0])?.abs())
}

fn tm_coalesce(args: FuncArgs) -> Result<Value, String> {
    for arg in args_vec(args) {
        if !arg.is_null() {
            return Ok(arg);
        }
    }
    Err("no non-null argument".to_string())
}

fn tm_compact(args: FuncArgs) -> Result<Value, String> {
    let args = args_vec(args);
    let items = args[0]
        .as_array()
        .ok_or_else(|| "compact expects a list".to_string())?;
    Ok(Value::Array(
        items
            .iter()
            .filter(|item| item.as_str().map(|s| !s.is_empty()).unwrap_or(true))
            .cloned()
            .collect(),
    ))
}

fn tm_contains(args: FuncArgs) -> Result<Value, String> {
    let args = args_vec(args);
    let items = args[0]
        .as_array()
        .ok_or_else(|| "contains expects a list".to_string())?;
    Ok(Value::from(items.contains(&args[1])))
}

fn tm_reverse(args: FuncArgs) -> Result<Value, String> {
    let args = args_vec(args);
    let items = args[0]
        .as_array()
        .ok_or_else(|| "reverse expects a list".to_string())?;
    Ok(Value::Array(items.iter().rev().cloned().collect()))
}

fn tm_tostring(args: FuncArgs) -> Result<Value, String> {
    let args = args_vec(args);
    Ok(Value::from(scalar_string(&args[0])?))
}

fn tm_tonumber(args: FuncArgs) -> Result<Value, String> {
    let args = args_vec(args);
    match &args[0] {
        Value::Number(num) => Ok(Value::Number(num.clone())),
        Value::String(s) => {
            let parsed: f64 = s
                .parse()
                .map_err(|_| format!("cannot convert {s:?} to number"))?;
            number_value(parsed)
        }
        other => Err(format!("cannot convert `{other}` to number")),
    }
}

fn number_arg(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(num) => num
            .as_f64()
            .ok_or_else(|| format!("number `{num}` is out of range")),
        other => Err(format!("expected a number, got `{other}`")),
    }
}

fn number_value(num: f64) -> Result<Value, String> {
    if num.fract() == 0.0 && num.abs() < i64::MAX as f64 {
        return Ok(Value::from(num as i64));
    }
    Number::from_f64(num)
        .map(Value::Number)
        .ok_or_else(|| format!("number {num} cannot be represented"))
}

/// String form of a scalar, as used inside string interpolations.
pub(crate) fn scalar_string(value: &Value) -> Result<String, String> {
    match value {
        Value::Null => Ok("null".to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(num) => Ok(num.to_string()),
        Value::String(s) => Ok(s.clone()),
        other => Err(format!("cannot convert `{other}` to string")),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hcl::eval::Evaluate;
    use pretty_assertions::assert_eq;

    fn eval(input: &str) -> Value {
        let mut ctx = Context::new();
        declare_all(&mut ctx);
        let expr: hcl::Expression = input
            .parse::<hcl_edit::expr::Expression>()
            .expect("expression must parse")
            .into();
        expr.evaluate(&ctx).expect("evaluation must succeed")
    }

    #[test]
    fn string_functions() {
        assert_eq!(eval(r#"tm_upper("abc")"#), Value::from("ABC"));
        assert_eq!(eval(r#"tm_lower("AbC")"#), Value::from("abc"));
        assert_eq!(eval(r#"tm_title("terra mate")"#), Value::from("Terra Mate"));
        assert_eq!(eval(r#"tm_trimspace("  x ")"#), Value::from("x"));
        assert_eq!(
            eval(r#"tm_replace("a/b/c", "/", "-")"#),
            Value::from("a-b-c")
        );
        assert_eq!(
            eval(r#"tm_join("-", ["a", "b"])"#),
            Value::from("a-b")
        );
        assert_eq!(
            eval(r#"tm_split(",", "a,b")"#),
            Value::Array(vec![Value::from("a"), Value::from("b")])
        );
        assert_eq!(
            eval(r#"tm_format("%s-%d", "id", 2)"#),
            Value::from("id-2")
        );
    }

    #[test]
    fn collection_functions() {
        assert_eq!(eval(r#"tm_length([1, 2, 3])"#), Value::from(3u64));
        assert_eq!(
            eval(r#"tm_concat([1], [2, 3])"#),
            eval("[1, 2, 3]")
        );
        assert_eq!(
            eval(r#"tm_merge({a = 1}, {b = 2, a = 3})"#),
            eval("{a = 3, b = 2}")
        );
        assert_eq!(eval(r#"tm_keys({a = 1, b = 2})"#), eval(r#"["a", "b"]"#));
        assert_eq!(eval(r#"tm_contains([1, 2], 2)"#), Value::from(true));
        assert_eq!(eval(r#"tm_reverse([1, 2])"#), eval("[2, 1]"));
        assert_eq!(eval(r#"tm_compact(["a", "", "b"])"#), eval(r#"["a", "b"]"#));
    }

    #[test]
    fn numeric_functions() {
        assert_eq!(eval("tm_min(3, 1, 2)"), Value::from(1i64));
        assert_eq!(eval("tm_max(3, 1, 2)"), Value::from(3i64));
        assert_eq!(eval("tm_abs(0 - 4)"), Value::from(4i64));
        assert_eq!(eval(r#"tm_tonumber("42")"#), Value::from(42i64));
        assert_eq!(eval("tm_tostring(42)"), Value::from("42"));
        assert_eq!(eval("tm_coalesce(null, 7)"), Value::from(7i64));
    }
}
