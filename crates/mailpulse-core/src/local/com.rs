//! Object-model binding over COM `IDispatch`.

#![allow(unsafe_code)]

use std::cell::Cell;

use windows::Win32::System::Com::{
    CLSCTX_LOCAL_SERVER, CLSIDFromProgID, COINIT_MULTITHREADED, CoCreateInstance, CoInitializeEx,
    DISPATCH_FLAGS, DISPATCH_METHOD, DISPATCH_PROPERTYGET, DISPATCH_PROPERTYPUT, DISPPARAMS,
    EXCEPINFO, IDispatch,
};
use windows::core::{BSTR, GUID, HRESULT, IUnknown, Interface, PCWSTR, VARIANT, w};

use super::automation::AutomationError;
use super::object_model::{Activator, Dispatch, Variant, ole_date};

const LOCALE_USER_DEFAULT: u32 = 0x400;
const DISPID_PROPERTYPUT: i32 = -3;

/// Failures meaning the client process went away.
#[allow(clippy::cast_possible_wrap)]
const STALE: [HRESULT; 4] = [
    HRESULT(0x8001_0108_u32 as i32), // RPC_E_DISCONNECTED
    HRESULT(0x8007_06BA_u32 as i32), // RPC_S_SERVER_UNAVAILABLE
    HRESULT(0x8001_0105_u32 as i32), // RPC_E_SERVERFAULT
    HRESULT(0x8004_01FD_u32 as i32), // CO_E_OBJNOTCONNECTED
];

const VT_EMPTY: u16 = 0;
const VT_NULL: u16 = 1;
const VT_DATE: u16 = 7;
const VT_BSTR: u16 = 8;
const VT_DISPATCH: u16 = 9;
const VT_BOOL: u16 = 11;
const VT_UNKNOWN: u16 = 13;

thread_local! {
    static APARTMENT: Cell<bool> = const { Cell::new(false) };
}

/// Joins the multithreaded apartment once per thread.
fn join_apartment() -> Result<(), AutomationError> {
    APARTMENT.with(|joined| {
        if joined.get() {
            return Ok(());
        }
        // SAFETY: no reserved pointer; a repeated call on the same thread only
        // bumps the apartment's reference count.
        unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) }
            .ok()
            .map_err(|err| AutomationError::Unavailable(err.message()))?;
        joined.set(true);
        Ok(())
    })
}

fn failure(err: &windows::core::Error, what: &str) -> AutomationError {
    if STALE.contains(&err.code()) {
        AutomationError::Stale(format!("{what}: {}", err.message()))
    } else {
        AutomationError::Call(format!("{what}: {}", err.message()))
    }
}

/// An object in the client process.
#[derive(Debug, Clone)]
pub struct ComObject(IDispatch);

// SAFETY: objects are created in the multithreaded apartment and every call
// joins it first, so the proxy is valid on whichever thread makes the call.
unsafe impl Send for ComObject {}

impl ComObject {
    fn dispid(&self, name: &str) -> Result<i32, AutomationError> {
        let wide: Vec<u16> = name.encode_utf16().chain(Some(0)).collect();
        let names = [PCWSTR(wide.as_ptr())];
        let mut id = 0;
        // SAFETY: `names` and `wide` outlive the call; one name, one id slot.
        unsafe {
            self.0
                .GetIDsOfNames(&GUID::zeroed(), names.as_ptr(), 1, LOCALE_USER_DEFAULT, &mut id)
        }
        .map_err(|err| failure(&err, name))?;
        Ok(id)
    }

    fn invoke(
        &self,
        name: &str,
        flags: DISPATCH_FLAGS,
        args: Vec<VARIANT>,
        named: Option<i32>,
    ) -> Result<VARIANT, AutomationError> {
        join_apartment()?;
        let id = self.dispid(name)?;
        // Arguments are passed last to first.
        let mut args: Vec<VARIANT> = args.into_iter().rev().collect();
        let mut named = named;
        let params = DISPPARAMS {
            rgvarg: args.as_mut_ptr(),
            rgdispidNamedArgs: named.as_mut().map_or(std::ptr::null_mut(), std::ptr::from_mut),
            cArgs: u32::try_from(args.len()).unwrap_or(u32::MAX),
            cNamedArgs: u32::from(named.is_some()),
        };
        let mut result = VARIANT::default();
        let mut exception = EXCEPINFO::default();
        // SAFETY: `params` points into `args` and `named`, both alive for the
        // call; `result` and `exception` are owned out-parameters.
        unsafe {
            self.0.Invoke(
                id,
                &GUID::zeroed(),
                LOCALE_USER_DEFAULT,
                flags,
                &params,
                Some(std::ptr::from_mut(&mut result)),
                Some(std::ptr::from_mut(&mut exception)),
                None,
            )
        }
        .map_err(|err| {
            let detail = exception.bstrDescription.to_string();
            if detail.is_empty() {
                failure(&err, name)
            } else {
                failure(&err, &format!("{name}: {detail}"))
            }
        })?;
        Ok(result)
    }
}

fn to_native(value: &Variant<ComObject>) -> VARIANT {
    match value {
        Variant::Empty => VARIANT::default(),
        Variant::Bool(b) => VARIANT::from(*b),
        Variant::Int(i) => i32::try_from(*i).map_or_else(|_| VARIANT::from(*i), VARIANT::from),
        Variant::Text(s) => VARIANT::from(BSTR::from(s.as_str())),
        Variant::Date(d) => VARIANT::from(d.to_string().as_str()),
        Variant::Object(object) => VARIANT::from(IUnknown::from(object.0.clone())),
    }
}

fn from_native(value: &VARIANT) -> Variant<ComObject> {
    // SAFETY: the tag is read from a VARIANT we own; the payload union is only
    // read for the tag it belongs to.
    let vt = unsafe { value.as_raw().Anonymous.Anonymous.vt };
    match vt {
        VT_EMPTY | VT_NULL => Variant::Empty,
        VT_BOOL => bool::try_from(value).map_or(Variant::Empty, Variant::Bool),
        VT_DATE => {
            // SAFETY: tag is VT_DATE.
            let days = unsafe { value.as_raw().Anonymous.Anonymous.Anonymous.date };
            ole_date(days).map_or(Variant::Empty, Variant::Date)
        }
        VT_BSTR => BSTR::try_from(value).map_or(Variant::Empty, |s| Variant::Text(s.to_string())),
        VT_DISPATCH | VT_UNKNOWN => IUnknown::try_from(value)
            .ok()
            .and_then(|unknown| unknown.cast::<IDispatch>().ok())
            .map_or(Variant::Empty, |dispatch| Variant::Object(ComObject(dispatch))),
        _ => i64::try_from(value).map_or(Variant::Empty, Variant::Int),
    }
}

impl Dispatch for ComObject {
    fn get(&self, name: &str, args: &[Variant<Self>]) -> Result<Variant<Self>, AutomationError> {
        let args = args.iter().map(to_native).collect();
        let result = self.invoke(name, DISPATCH_PROPERTYGET, args, None)?;
        Ok(from_native(&result))
    }

    fn put(&self, name: &str, value: Variant<Self>) -> Result<(), AutomationError> {
        let args = vec![to_native(&value)];
        self.invoke(name, DISPATCH_PROPERTYPUT, args, Some(DISPID_PROPERTYPUT))?;
        Ok(())
    }

    fn call(&self, name: &str, args: &[Variant<Self>]) -> Result<Variant<Self>, AutomationError> {
        let args = args.iter().map(to_native).collect();
        let flags = DISPATCH_METHOD | DISPATCH_PROPERTYGET;
        let result = self.invoke(name, flags, args, None)?;
        Ok(from_native(&result))
    }
}

/// Starts or attaches to the installed client by its registered class.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComActivator;

impl Activator for ComActivator {
    type Object = ComObject;

    fn application(&mut self) -> Result<ComObject, AutomationError> {
        join_apartment()?;
        let unavailable = |err: windows::core::Error| AutomationError::Unavailable(err.message());
        // SAFETY: static, nul-terminated class name.
        let class = unsafe { CLSIDFromProgID(w!("Outlook.Application")) }.map_err(unavailable)?;
        // SAFETY: `class` is a valid class id; no aggregation.
        let app: IDispatch =
            unsafe { CoCreateInstance(&class, None, CLSCTX_LOCAL_SERVER) }.map_err(unavailable)?;
        Ok(ComObject(app))
    }
}
