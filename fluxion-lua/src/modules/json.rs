//! JSON encoding for sandboxed scripts

use crate::module::SandboxModule;
use mlua::prelude::*;

pub struct JsonModule;

impl SandboxModule for JsonModule {
    fn id(&self) -> &'static str {
        "json"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let json_table = lua.create_table()?;

        // json.encode(value) -> string
        json_table.set(
            "encode",
            lua.create_function(|lua, value: LuaValue| {
                let value: serde_json::Value = lua.from_value(value)?;
                serde_json::to_string(&value).map_err(LuaError::external)
            })?,
        )?;

        // json.decode(text) -> value
        json_table.set(
            "decode",
            lua.create_function(|lua, text: String| {
                let value: serde_json::Value =
                    serde_json::from_str(&text).map_err(LuaError::external)?;
                lua.to_value(&value)
            })?,
        )?;

        lua.globals().set(self.id(), json_table)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let lua = Lua::new();
        JsonModule.register(&lua).unwrap();

        let encoded: String = lua
            .load(r#"return json.encode({ n = 1 })"#)
            .eval()
            .unwrap();
        assert_eq!(encoded, r#"{"n":1}"#);

        let name: String = lua
            .load(r#"return json.decode('{"user": {"name": "ada"}}').user.name"#)
            .eval()
            .unwrap();
        assert_eq!(name, "ada");
    }

    #[test]
    fn test_decode_invalid_json_raises() {
        let lua = Lua::new();
        JsonModule.register(&lua).unwrap();

        let ok: bool = lua
            .load(r#"return (pcall(json.decode, "{nope"))"#)
            .eval()
            .unwrap();
        assert!(!ok);
    }
}
