// SPDX-License-Identifier: MIT

//! Process/Thread Attribute List.
//! Because much of windows requires explicit add/remove actions,
//! wrapping it in a single struct that implements Drop will make code maintenance easier.

use std::marker::PhantomData;

use windows::Win32::{
    Foundation::{ERROR_INSUFFICIENT_BUFFER, GetLastError},
    System::Threading,
};

use crate::error::{BrokerError, OsError};

/// A value that can be attached to a process attribute list.
pub trait ThreadAttribute {
    fn attribute(&self) -> usize;
    fn lp_value(&self) -> *const core::ffi::c_void;
    fn cb_size(&self) -> usize;
}

#[cfg(test)]
thread_local! {
    static LIVE_LISTS: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

/// An initialized attribute list with room for a fixed number of attributes.
///
/// The OS keeps pointers to every added value, so each value is borrowed for
/// the lifetime of the list.
pub struct AttributeList<'a> {
    // pointer-aligned backing store for the opaque list
    _buf: Vec<usize>,
    list: Threading::LPPROC_THREAD_ATTRIBUTE_LIST,
    capacity: u32,
    added: u32,
    _values: PhantomData<&'a ()>,
}

impl<'a> AttributeList<'a> {
    pub fn new(capacity: u32) -> Result<Self, BrokerError> {
        // Get the expected size.  A zero sized query fails with
        // ERROR_INSUFFICIENT_BUFFER and reports the needed size.
        let mut size: usize = 0;
        if let Err(e) = unsafe { Threading::InitializeProcThreadAttributeList(None, capacity, Some(0), &mut size) } {
            if unsafe { GetLastError() } != ERROR_INSUFFICIENT_BUFFER {
                return Err(BrokerError::Initialization(e.into()));
            }
        }
        if size == 0 {
            return Err(BrokerError::Initialization(OsError::message("attribute list size query returned zero")));
        }

        let mut buf = vec![0usize; size.div_ceil(std::mem::size_of::<usize>())];
        let list = Threading::LPPROC_THREAD_ATTRIBUTE_LIST(buf.as_mut_ptr().cast());
        unsafe { Threading::InitializeProcThreadAttributeList(Some(list), capacity, Some(0), &mut size) }
            .map_err(|e| BrokerError::Initialization(e.into()))?;

        #[cfg(test)]
        LIVE_LISTS.with(|n| n.set(n.get() + 1));
        Ok(AttributeList { _buf: buf, list, capacity, added: 0, _values: PhantomData })
    }

    /// Attach a value.  Fails once the declared capacity is used up.
    pub fn add<T: ThreadAttribute>(&mut self, value: &'a T) -> Result<(), BrokerError> {
        if self.added >= self.capacity {
            return Err(BrokerError::Attribute(OsError::message(format!(
                "attribute list already holds {} attributes",
                self.capacity
            ))));
        }
        unsafe {
            Threading::UpdateProcThreadAttribute(
                self.list,
                0, // dwFlags must be 0
                value.attribute(),
                Some(value.lp_value()),
                value.cb_size(),
                None, // previous value not wanted
                None,
            )
        }
        .map_err(|e| BrokerError::Attribute(e.into()))?;
        self.added += 1;
        Ok(())
    }

    pub fn len(&self) -> u32 {
        self.added
    }

    pub fn is_empty(&self) -> bool {
        self.added == 0
    }

    pub fn as_raw(&self) -> Threading::LPPROC_THREAD_ATTRIBUTE_LIST {
        self.list
    }
}

impl Drop for AttributeList<'_> {
    fn drop(&mut self) {
        unsafe { Threading::DeleteProcThreadAttributeList(self.list) };
        #[cfg(test)]
        LIVE_LISTS.with(|n| n.set(n.get() - 1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::capabilities::CapabilitySet;
    use crate::sandbox::sid::SidHandle;
    use crate::sandbox::SecurityCapabilities;
    use windows::Win32::Security;

    #[test]
    fn holds_declared_number_of_attributes() {
        let container = SidHandle::well_known(Security::WinLocalSystemSid).unwrap();
        let caps = CapabilitySet::standard().unwrap();
        let sc = SecurityCapabilities::new(&container, &caps);

        let mut list = AttributeList::new(1).unwrap();
        list.add(&sc).unwrap();
        assert_eq!(list.len(), 1);
        assert!(matches!(list.add(&sc), Err(BrokerError::Attribute(_))));
    }

    #[test]
    fn empty_list_is_released_on_drop() {
        let list = AttributeList::new(1).unwrap();
        assert!(list.is_empty());
        assert_eq!(LIVE_LISTS.with(|n| n.get()), 1);
        drop(list);
        assert_eq!(LIVE_LISTS.with(|n| n.get()), 0);
    }

    #[test]
    fn repeated_create_and_drop() {
        for n in 0..64 {
            let list = AttributeList::new(n % 4 + 1).unwrap();
            assert!(list.is_empty());
        }
    }
}
