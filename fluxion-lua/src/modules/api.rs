//! The `api` object passed to script entry points
//!
//! ```lua
//! return function(input, options, api)
//!     return api.createResult(input * 2, { api.triggerNextAtom("notify") })
//! end
//! ```

use mlua::prelude::*;
use mlua::Variadic;

/// Builds a fresh `api` table
pub fn create_api(lua: &Lua) -> LuaResult<LuaTable> {
    let api = lua.create_table()?;

    // api.createResult(output, nextAtoms?)
    // api.createResult(success, output, nextAtoms?)
    api.set(
        "createResult",
        lua.create_function(|lua, args: Variadic<LuaValue>| create_result(lua, args))?,
    )?;

    // api.triggerNextAtom(idOrName, input?, only?)
    api.set(
        "triggerNextAtom",
        lua.create_function(
            |lua, (target, input, only): (LuaValue, LuaValue, Option<bool>)| {
                trigger_next_atom(lua, target, input, only.unwrap_or(false))
            },
        )?,
    )?;

    Ok(api)
}

fn create_result(lua: &Lua, args: Variadic<LuaValue>) -> LuaResult<LuaTable> {
    let mut args = args.into_iter();
    let first = args.next().unwrap_or(LuaValue::Nil);
    let second = args.next();

    let (success, output, next_atoms) = match (first, second) {
        (LuaValue::Boolean(success), Some(output)) => (success, output, args.next()),
        (output, next_atoms) => (true, output, next_atoms),
    };

    let result = lua.create_table()?;
    result.set("success", success)?;
    result.set("output", output)?;
    match next_atoms {
        None | Some(LuaValue::Nil) => {}
        Some(LuaValue::Table(list)) => result.set("nextAtoms", list)?,
        Some(other) => {
            return Err(LuaError::RuntimeError(format!(
                "createResult: nextAtoms must be a table, got {}",
                other.type_name()
            )));
        }
    }
    Ok(result)
}

fn trigger_next_atom(
    lua: &Lua,
    target: LuaValue,
    input: LuaValue,
    only: bool,
) -> LuaResult<LuaTable> {
    let option = lua.create_table()?;
    match target {
        LuaValue::Integer(id) => option.set("atomId", id)?,
        LuaValue::Number(n) if n.fract() == 0.0 => option.set("atomId", n as i64)?,
        LuaValue::String(name) => option.set("atomName", name)?,
        other => {
            return Err(LuaError::RuntimeError(format!(
                "triggerNextAtom: expected an atom id or name, got {}",
                other.type_name()
            )));
        }
    }
    option.set("input", input)?;
    option.set("only", only)?;
    Ok(option)
}
